//! Query embedding cache
//!
//! Repeated queries are common over a tool-call interface, so query
//! embeddings are kept in a TTL-bounded LRU keyed by the normalized query
//! text. Entries are process-local and never persisted.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cache counters, taken as a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

struct CacheInner {
    map: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// LRU cache of query embeddings with per-entry TTL and hit/miss stats.
///
/// Keys are normalized (lowercase + trim) so `"Hello "` and `"hello"` share
/// an entry. An expired entry counts as a miss and is evicted on access.
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_size: usize,
}

impl EmbeddingCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap();
        Self {
            inner: Mutex::new(CacheInner {
                map: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
            ttl,
            max_size: max_size.max(1),
        }
    }

    fn normalize(query: &str) -> String {
        query.trim().to_lowercase()
    }

    /// Look up a query embedding. A hit promotes the entry to
    /// most-recently-used; an expired entry is evicted and counted as a miss.
    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        let key = Self::normalize(query);
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        let expired = match inner.map.peek(&key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.map.pop(&key);
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.map.get(&key).map(|entry| entry.vector.clone())
    }

    /// Store a query embedding, evicting from the LRU end at capacity.
    pub fn set(&self, query: &str, vector: Vec<f32>) {
        let key = Self::normalize(query);
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.map.put(
            key,
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Whether a live (non-expired) entry exists, without touching counters
    /// or recency.
    pub fn has(&self, query: &str) -> bool {
        let key = Self::normalize(query);
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .map
            .peek(&key)
            .map(|entry| entry.inserted_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Drop all expired entries, returning how many were evicted
    pub fn prune(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.map.pop(key);
        }
        expired.len()
    }

    /// Empty the cache and reset both counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.map.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len(),
            max_size: self.max_size,
        }
    }

    /// `hits / (hits + misses)`, or 0 when nothing has been looked up
    pub fn hit_rate(&self) -> f64 {
        let stats = self.stats();
        let total = stats.hits + stats.misses;
        if total == 0 {
            0.0
        } else {
            stats.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl: Duration) -> EmbeddingCache {
        EmbeddingCache::new(max_size, ttl)
    }

    #[test]
    fn round_trips_a_vector() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("query", vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.get("query"), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn keys_are_normalized_consistently() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("  Hello World  ", vec![0.5]);
        assert_eq!(cache.get("hello world"), Some(vec![0.5]));
        assert!(cache.has("HELLO WORLD"));
    }

    #[test]
    fn lru_eviction_respects_recency() {
        let cache = cache(3, Duration::from_secs(600));
        cache.set("q1", vec![1.0]);
        cache.set("q2", vec![2.0]);
        cache.set("q3", vec![3.0]);
        // Promote q1, then push q4 past capacity: q2 is the LRU victim.
        assert!(cache.get("q1").is_some());
        cache.set("q4", vec![4.0]);

        assert_eq!(cache.get("q2"), None);
        assert!(cache.get("q1").is_some());
        assert!(cache.get("q3").is_some());
        assert!(cache.get("q4").is_some());
    }

    #[test]
    fn expired_entry_is_a_miss_and_evicted() {
        let cache = cache(10, Duration::from_millis(0));
        cache.set("q", vec![1.0]);

        assert_eq!(cache.get("q"), None);
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
        assert!(!cache.has("q"));
    }

    #[test]
    fn prune_counts_expired_entries() {
        let cache = cache(10, Duration::from_millis(0));
        cache.set("a", vec![1.0]);
        cache.set("b", vec![2.0]);
        assert_eq!(cache.prune(), 2);
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.prune(), 0);
    }

    #[test]
    fn clear_resets_counters() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("q", vec![1.0]);
        cache.get("q");
        cache.get("missing");
        assert!(cache.stats().hits > 0);

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn hit_rate_over_operations() {
        let cache = cache(10, Duration::from_secs(60));
        assert_eq!(cache.hit_rate(), 0.0);

        cache.set("q", vec![1.0]);
        cache.get("q");
        cache.get("q");
        cache.get("absent");

        let rate = cache.hit_rate();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
    }
}

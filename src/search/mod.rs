//! Hybrid search service
//!
//! A query is embedded once (through the process-wide cache), then the
//! vector and lexical legs run in parallel against the store. Per-source
//! searches fuse the two legs with Reciprocal Rank Fusion; group searches
//! flatten every member's legs and order by raw distance. The final response
//! is a document list bounded both by count and by a character budget.

use crate::embed::{EmbeddingCache, EmbeddingProvider};
use crate::error::Result;
use crate::markdown;
use crate::store::{ChunkHit, SearchFilters, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const RRF_K: f64 = 60.0;

/// How many characters of a chunk participate in the fusion key
const FUSE_KEY_CHARS: usize = 100;

/// Don't bother truncating a document into less room than this
const MIN_TRUNCATE_BUDGET: usize = 50;

/// A search request
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
}

/// Response-side limits
#[derive(Debug, Clone)]
pub struct SearchLimits {
    pub max_total_chars: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_total_chars: crate::config::default_max_total_chars(),
        }
    }
}

/// One returned document
#[derive(Debug, Clone)]
pub struct SearchDocument {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// The bounded search response
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub documents: Vec<SearchDocument>,
    pub total_chars: usize,
    pub truncated: bool,
}

pub struct SearchService {
    store: Store,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
}

impl SearchService {
    pub fn new(
        store: Store,
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
    ) -> Self {
        Self {
            store,
            provider,
            cache,
        }
    }

    /// Search a single source by name
    pub async fn search(
        &self,
        source: &str,
        request: &SearchRequest,
        limits: &SearchLimits,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let embedding = self.query_embedding(&request.query).await?;

        let fetch_limit = (request.limit * 3).max(15);
        let filters = SearchFilters {
            source: Some(source.to_string()),
            limit: fetch_limit,
            ..Default::default()
        };

        let vector_leg = async {
            let leg_started = Instant::now();
            let hits = self.store.vector_search(&embedding, &filters).await;
            (hits, leg_started.elapsed())
        };
        let lexical_leg = async {
            let leg_started = Instant::now();
            let hits = self.store.lexical_search(&request.query, &filters).await;
            (hits, leg_started.elapsed())
        };

        let ((vector, vector_elapsed), (lexical, lexical_elapsed)) =
            tokio::join!(vector_leg, lexical_leg);
        let (vector, lexical) = (vector?, lexical?);

        debug!(
            source,
            vector_hits = vector.len(),
            lexical_hits = lexical.len(),
            vector_ms = vector_elapsed.as_millis(),
            lexical_ms = lexical_elapsed.as_millis(),
            "Search legs finished"
        );

        let ranked = if lexical.is_empty() {
            vector
        } else {
            rrf_fuse(vector, lexical, request.limit)
        };

        let response = self.materialize(ranked, request.limit, limits).await?;
        info!(
            source,
            query = %request.query,
            results = response.documents.len(),
            total_chars = response.total_chars,
            truncated = response.truncated,
            duration_ms = started.elapsed().as_millis(),
            "Search complete"
        );
        Ok(response)
    }

    /// Search every source in a group, flattening results by distance
    pub async fn search_group(
        &self,
        group: &str,
        request: &SearchRequest,
        limits: &SearchLimits,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let sources = self.store.sources_by_group(group).await?;
        if sources.is_empty() {
            return Ok(SearchResponse {
                documents: Vec::new(),
                total_chars: 0,
                truncated: false,
            });
        }

        let embedding = self.query_embedding(&request.query).await?;
        let per_source = (request.limit * 3).div_ceil(sources.len()) + 2;

        let legs = sources.iter().map(|source| {
            let filters = SearchFilters {
                source: Some(source.name.clone()),
                limit: per_source,
                ..Default::default()
            };
            let embedding = &embedding;
            let query = &request.query;
            async move {
                let (vector, lexical) = tokio::join!(
                    self.store.vector_search(embedding, &filters),
                    self.store.lexical_search(query, &filters),
                );
                Ok::<_, crate::error::Error>((vector?, lexical?))
            }
        });

        let mut hits: Vec<ChunkHit> = Vec::new();
        for (vector, lexical) in futures::future::try_join_all(legs).await? {
            hits.extend(vector);
            hits.extend(lexical);
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let response = self.materialize(hits, request.limit, limits).await?;
        info!(
            group,
            query = %request.query,
            results = response.documents.len(),
            total_chars = response.total_chars,
            truncated = response.truncated,
            duration_ms = started.elapsed().as_millis(),
            "Group search complete"
        );
        Ok(response)
    }

    /// Embed the query, going through the cache first
    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        let normalized = query.trim().to_lowercase();

        if let Some(cached) = self.cache.get(&normalized) {
            debug!(query = %normalized, "Query embedding cache hit");
            return Ok(cached);
        }

        debug!(query = %normalized, "Query embedding cache miss");
        let mut vectors = self.provider.embed_batch(&[normalized.clone()]).await?;
        let embedding = vectors
            .pop()
            .ok_or_else(|| crate::error::Error::Embedding("provider returned no vector".into()))?;

        self.cache.set(&normalized, embedding.clone());
        Ok(embedding)
    }

    /// Turn ranked chunk hits into a budgeted document list: deduplicate to
    /// the first `limit` distinct documents in rank order, clean each one,
    /// and stop once the character budget is spent.
    async fn materialize(
        &self,
        ranked: Vec<ChunkHit>,
        limit: usize,
        limits: &SearchLimits,
    ) -> Result<SearchResponse> {
        let mut ordered_ids: Vec<i64> = Vec::new();
        for hit in &ranked {
            if !ordered_ids.contains(&hit.document_id) {
                ordered_ids.push(hit.document_id);
                if ordered_ids.len() == limit {
                    break;
                }
            }
        }

        let fetched = self.store.get_documents_by_ids(&ordered_ids).await?;
        let mut by_id: HashMap<i64, _> = fetched.into_iter().map(|d| (d.id, d)).collect();

        let mut documents = Vec::new();
        let mut total_chars = 0usize;
        let mut truncated = false;

        for id in ordered_ids {
            let Some(doc) = by_id.remove(&id) else {
                continue;
            };
            let content = markdown::clean(&doc.content);
            let remaining = limits.max_total_chars - total_chars;

            if content.len() <= remaining {
                total_chars += content.len();
                documents.push(SearchDocument {
                    title: doc.title,
                    url: doc.url,
                    content,
                });
                continue;
            }

            if remaining >= MIN_TRUNCATE_BUDGET {
                let cut = markdown::truncate(&content, remaining);
                total_chars += cut.len();
                documents.push(SearchDocument {
                    title: doc.title,
                    url: doc.url,
                    content: cut,
                });
            }
            truncated = true;
            break;
        }

        Ok(SearchResponse {
            documents,
            total_chars,
            truncated,
        })
    }
}

/// Reciprocal Rank Fusion over the two legs with equal weight.
///
/// Hits are keyed by `(url, first 100 chunk chars)`. Ordering is fully
/// deterministic: combined score descending, then the vector-leg rank as a
/// stable tiebreak. The reported `distance` becomes `1 - score` so smaller
/// still means better for callers.
fn rrf_fuse(vector: Vec<ChunkHit>, lexical: Vec<ChunkHit>, limit: usize) -> Vec<ChunkHit> {
    struct Fused {
        hit: ChunkHit,
        score: f64,
        vector_rank: usize,
    }

    let mut by_key: HashMap<(String, String), Fused> = HashMap::new();

    for (rank, hit) in vector.into_iter().enumerate() {
        let key = fuse_key(&hit);
        let entry = by_key.entry(key).or_insert(Fused {
            hit,
            score: 0.0,
            vector_rank: rank,
        });
        entry.score += 1.0 / (RRF_K + rank as f64 + 1.0);
        entry.vector_rank = entry.vector_rank.min(rank);
    }

    for (rank, hit) in lexical.into_iter().enumerate() {
        let key = fuse_key(&hit);
        let entry = by_key.entry(key).or_insert(Fused {
            hit,
            score: 0.0,
            vector_rank: usize::MAX,
        });
        entry.score += 1.0 / (RRF_K + rank as f64 + 1.0);
    }

    let mut fused: Vec<Fused> = by_key.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.vector_rank.cmp(&b.vector_rank))
    });
    fused.truncate(limit);

    fused
        .into_iter()
        .map(|f| {
            let mut hit = f.hit;
            hit.distance = 1.0 - f.score;
            hit
        })
        .collect()
}

fn fuse_key(hit: &ChunkHit) -> (String, String) {
    (
        hit.url.clone(),
        hit.content.chars().take(FUSE_KEY_CHARS).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, url: &str, content: &str, distance: f64) -> ChunkHit {
        ChunkHit {
            chunk_id: id,
            document_id: id,
            chunk_index: 0,
            content: content.to_string(),
            url: url.to_string(),
            title: format!("doc {id}"),
            path: None,
            distance,
        }
    }

    #[test]
    fn dual_leg_hits_outrank_single_leg() {
        // Vector order: A, C. Lexical order: B, A.
        let vector = vec![
            hit(1, "https://d/a", "chunk a", 0.1),
            hit(3, "https://d/c", "chunk c", 0.2),
        ];
        let lexical = vec![
            hit(2, "https://d/b", "chunk b", 1.5),
            hit(1, "https://d/a", "chunk a", 2.0),
        ];

        let fused = rrf_fuse(vector, lexical, 10);
        let urls: Vec<&str> = fused.iter().map(|h| h.url.as_str()).collect();

        // A: 1/61 + 1/62, B: 1/61, C: 1/62
        assert_eq!(urls, vec!["https://d/a", "https://d/b", "https://d/c"]);

        let a_score = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((fused[0].distance - (1.0 - a_score)).abs() < 1e-9);
    }

    #[test]
    fn fusion_is_symmetric_between_legs() {
        let leg_one = vec![
            hit(1, "https://d/a", "chunk a", 0.1),
            hit(2, "https://d/b", "chunk b", 0.2),
        ];
        let leg_two = vec![
            hit(3, "https://d/c", "chunk c", 0.3),
            hit(1, "https://d/a", "chunk a", 0.4),
        ];

        let forward = rrf_fuse(leg_one.clone(), leg_two.clone(), 10);
        let swapped = rrf_fuse(leg_two, leg_one, 10);

        let forward_urls: Vec<&str> = forward.iter().map(|h| h.url.as_str()).collect();
        let swapped_urls: Vec<&str> = swapped.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(forward_urls, swapped_urls);
    }

    #[test]
    fn ties_break_by_vector_rank() {
        // B and C each appear only once at the same rank in opposite legs,
        // so their combined scores tie; B holds vector rank 1 and wins.
        let vector = vec![
            hit(1, "https://d/a", "chunk a", 0.1),
            hit(2, "https://d/b", "chunk b", 0.2),
        ];
        let lexical = vec![
            hit(1, "https://d/a", "chunk a", 1.0),
            hit(3, "https://d/c", "chunk c", 2.0),
        ];

        let fused = rrf_fuse(vector, lexical, 10);
        let urls: Vec<&str> = fused.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["https://d/a", "https://d/b", "https://d/c"]);
    }

    #[test]
    fn fusion_respects_limit() {
        let vector: Vec<ChunkHit> = (0..10)
            .map(|i| hit(i, &format!("https://d/{i}"), "chunk", i as f64 * 0.1))
            .collect();
        let lexical = vec![hit(0, "https://d/0", "chunk", 1.0)];

        let fused = rrf_fuse(vector, lexical, 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn same_url_different_chunks_stay_distinct() {
        let vector = vec![
            hit(1, "https://d/a", "first chunk text", 0.1),
            hit(1, "https://d/a", "second chunk text", 0.2),
        ];
        let fused = rrf_fuse(vector, vec![hit(1, "https://d/a", "first chunk text", 0.5)], 10);
        assert_eq!(fused.len(), 2);
    }
}

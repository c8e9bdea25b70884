//! End-to-end search scenarios over a seeded in-memory store.
//!
//! The embedding provider is a deterministic stub so rankings are exact:
//! vector distances come from hand-picked embeddings, lexical ranks from
//! real FTS5 BM25 over the seeded chunk text.

use async_trait::async_trait;
use mcp_docs::embed::{EmbeddingCache, EmbeddingProvider};
use mcp_docs::error::Result;
use mcp_docs::ingest::sha256_hex;
use mcp_docs::search::{SearchLimits, SearchRequest, SearchService};
use mcp_docs::store::{NewSource, SearchFilters, SourceType, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Maps known queries to fixed vectors; anything else embeds to the default.
struct StubProvider {
    by_query: HashMap<String, Vec<f32>>,
    default: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| self.by_query.get(t).cloned().unwrap_or_else(|| self.default.clone()))
            .collect())
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

fn service(store: &Store) -> (SearchService, Arc<EmbeddingCache>) {
    let mut by_query = HashMap::new();
    by_query.insert("cats".to_string(), vec![1.0, 0.0, 0.0]);
    by_query.insert("xyznonexistent".to_string(), vec![1.0, 0.0, 0.0]);

    let provider = Arc::new(StubProvider {
        by_query,
        default: vec![0.0, 0.0, 1.0],
    });
    let cache = Arc::new(EmbeddingCache::new(100, Duration::from_secs(600)));
    (
        SearchService::new(store.clone(), provider, Arc::clone(&cache)),
        cache,
    )
}

fn source(name: &str) -> NewSource {
    NewSource {
        name: name.to_string(),
        source_type: SourceType::LinkManifest,
        base_url: format!("https://{name}.test/llms.txt"),
        group_name: None,
        description: None,
        options: None,
    }
}

async fn seed_doc(
    store: &Store,
    source_id: i64,
    url: &str,
    title: &str,
    content: &str,
    embedding: &[f32],
) -> i64 {
    let hash = sha256_hex(content);
    let id = store
        .upsert_document(source_id, url, title, Some("index"), content, &hash, None)
        .await
        .unwrap();
    store.insert_chunk(id, 0, content, embedding, 4).await.unwrap();
    id
}

/// Three documents tuned so the legs disagree: vector prefers Alpha then
/// Gamma, BM25 prefers Beta then Alpha.
async fn seed_rrf_fixture(store: &Store) -> i64 {
    let source_id = store.upsert_source(&source("demo")).await.unwrap();
    seed_doc(
        store,
        source_id,
        "https://d/a",
        "Alpha",
        "cats live here quietly",
        &[1.0, 0.0, 0.0],
    )
    .await;
    seed_doc(
        store,
        source_id,
        "https://d/b",
        "Beta",
        "cats cats cats",
        &[0.0, 1.0, 0.0],
    )
    .await;
    seed_doc(
        store,
        source_id,
        "https://d/c",
        "Gamma",
        "dogs and birds only",
        &[0.8, 0.6, 0.0],
    )
    .await;
    source_id
}

#[tokio::test]
async fn vector_only_hit_returns_single_document() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = store.upsert_source(&source("demo")).await.unwrap();
    seed_doc(
        &store,
        source_id,
        "https://d/one",
        "Alpha",
        "cats dogs birds",
        &[1.0, 0.0, 0.0],
    )
    .await;

    let (service, _) = service(&store);
    let request = SearchRequest {
        query: "cats".to_string(),
        limit: 5,
    };

    let response = service
        .search("demo", &request, &SearchLimits::default())
        .await
        .unwrap();

    assert_eq!(response.documents.len(), 1);
    assert_eq!(response.documents[0].title, "Alpha");
    assert_eq!(response.documents[0].url, "https://d/one");
    assert!(!response.truncated);
}

#[tokio::test]
async fn rrf_boosts_documents_matched_by_both_legs() {
    let store = Store::open_in_memory().await.unwrap();
    seed_rrf_fixture(&store).await;

    let (service, _) = service(&store);
    let request = SearchRequest {
        query: "cats".to_string(),
        limit: 5,
    };

    let response = service
        .search("demo", &request, &SearchLimits::default())
        .await
        .unwrap();

    let titles: Vec<&str> = response.documents.iter().map(|d| d.title.as_str()).collect();
    // Alpha appears in both legs, Beta only lexically, Gamma only by vector.
    assert_eq!(titles, vec!["Alpha", "Beta", "Gamma"]);
}

#[tokio::test]
async fn empty_lexical_leg_falls_back_to_vector_order() {
    let store = Store::open_in_memory().await.unwrap();
    seed_rrf_fixture(&store).await;

    let (service, _) = service(&store);
    let request = SearchRequest {
        query: "xyznonexistent".to_string(),
        limit: 5,
    };

    let response = service
        .search("demo", &request, &SearchLimits::default())
        .await
        .unwrap();

    let titles: Vec<&str> = response.documents.iter().map(|d| d.title.as_str()).collect();
    // Pure vector order: exact match first, then the 0.2-distance neighbor.
    assert_eq!(titles[0], "Alpha");
    assert_eq!(titles[1], "Gamma");
}

#[tokio::test]
async fn repeated_query_hits_the_embedding_cache() {
    let store = Store::open_in_memory().await.unwrap();
    seed_rrf_fixture(&store).await;

    let (service, cache) = service(&store);
    let request = SearchRequest {
        query: "cats".to_string(),
        limit: 5,
    };

    service
        .search("demo", &request, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().hits, 0);

    // Different surface form, same normalized key.
    let request2 = SearchRequest {
        query: "  CATS ".to_string(),
        limit: 5,
    };
    service
        .search("demo", &request2, &SearchLimits::default())
        .await
        .unwrap();
    assert_eq!(cache.stats().hits, 1);
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn search_respects_limit_and_char_budget() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = store.upsert_source(&source("demo")).await.unwrap();

    for i in 0..4 {
        let content = format!("cats paragraph {} {}", i, "filler text ".repeat(30));
        seed_doc(
            &store,
            source_id,
            &format!("https://d/{i}"),
            &format!("Doc {i}"),
            &content,
            &[1.0, 0.0, i as f32 * 0.01],
        )
        .await;
    }

    let (service, _) = service(&store);
    let request = SearchRequest {
        query: "cats".to_string(),
        limit: 2,
    };

    let response = service
        .search("demo", &request, &SearchLimits::default())
        .await
        .unwrap();
    assert!(response.documents.len() <= 2);

    // Now squeeze the same search into a tiny character budget.
    let tight = SearchLimits {
        max_total_chars: 400,
    };
    let response = service.search("demo", &request, &tight).await.unwrap();
    assert!(response.total_chars <= 400);
    assert!(response.truncated);
}

#[tokio::test]
async fn group_search_spans_member_sources() {
    let store = Store::open_in_memory().await.unwrap();

    let mut first = source("alpha-docs");
    first.group_name = Some("pets".to_string());
    let mut second = source("beta-docs");
    second.group_name = Some("pets".to_string());

    let first_id = store.upsert_source(&first).await.unwrap();
    let second_id = store.upsert_source(&second).await.unwrap();

    seed_doc(
        &store,
        first_id,
        "https://a/cats",
        "Cats A",
        "cats in source alpha",
        &[1.0, 0.0, 0.0],
    )
    .await;
    seed_doc(
        &store,
        second_id,
        "https://b/cats",
        "Cats B",
        "cats in source beta",
        &[0.9, 0.1, 0.0],
    )
    .await;

    let (service, _) = service(&store);
    let request = SearchRequest {
        query: "cats".to_string(),
        limit: 5,
    };

    let response = service
        .search_group("pets", &request, &SearchLimits::default())
        .await
        .unwrap();

    let urls: Vec<&str> = response.documents.iter().map(|d| d.url.as_str()).collect();
    assert!(urls.contains(&"https://a/cats"));
    assert!(urls.contains(&"https://b/cats"));
}

#[tokio::test]
async fn changed_content_invalidates_old_chunks() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = store.upsert_source(&source("demo")).await.unwrap();

    // First version: four chunks about zebras.
    let first = "zebras roam the savanna";
    let hash = sha256_hex(first);
    let doc_id = store
        .upsert_document(source_id, "https://d/one", "Doc", Some("one"), first, &hash, None)
        .await
        .unwrap();
    for i in 0..4 {
        store
            .insert_chunk(doc_id, i, &format!("zebras part {i}"), &[0.0, 0.0, 1.0], 3)
            .await
            .unwrap();
    }

    // Second version: two chunks about cats.
    let second = "cats moved in";
    let hash2 = sha256_hex(second);
    let doc_id2 = store
        .upsert_document(source_id, "https://d/one", "Doc", Some("one"), second, &hash2, None)
        .await
        .unwrap();
    assert_eq!(doc_id, doc_id2);
    store
        .insert_chunk(doc_id, 0, "cats moved", &[1.0, 0.0, 0.0], 2)
        .await
        .unwrap();
    store
        .insert_chunk(doc_id, 1, "in recently", &[0.9, 0.1, 0.0], 2)
        .await
        .unwrap();

    assert_eq!(store.count_chunks(doc_id).await.unwrap(), 2);

    // Neither leg may surface the zebra-era chunks.
    let filters = SearchFilters {
        source: Some("demo".to_string()),
        limit: 10,
        ..Default::default()
    };
    assert!(store.lexical_search("zebras", &filters).await.unwrap().is_empty());

    let vector = store.vector_search(&[0.0, 0.0, 1.0], &filters).await.unwrap();
    assert!(vector.iter().all(|hit| !hit.content.contains("zebras")));
}

#[tokio::test]
async fn unchanged_hash_marks_document_as_skippable() {
    let store = Store::open_in_memory().await.unwrap();
    let source_id = store.upsert_source(&source("demo")).await.unwrap();

    let content = "stable content";
    let hash = sha256_hex(content);
    store
        .upsert_document(source_id, "https://d/one", "Doc", Some("one"), content, &hash, None)
        .await
        .unwrap();

    // Identical bytes: the stored hash matches, so ingestion would skip.
    assert_eq!(
        store.document_hash(source_id, "https://d/one").await.unwrap(),
        Some(hash.clone())
    );

    // One changed byte flips the classification.
    let changed = sha256_hex("stable content!");
    assert_ne!(Some(changed), Some(hash));
}

//! Embedding generation
//!
//! This module provides an abstraction over embedding providers with:
//! - A trait for different backends
//! - An OpenAI-compatible HTTP backend
//! - Batched, bounded-concurrency streaming for large ingestion runs

pub mod cache;
mod openai;

pub use cache::{CacheStats, EmbeddingCache};
pub use openai::OpenAiProvider;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};

/// Trait for embedding providers
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create a provider based on configuration
pub fn create_provider(config: &Config) -> Result<Box<dyn EmbeddingProvider>> {
    match config.embedding_provider.as_str() {
        "openai" => Ok(Box::new(OpenAiProvider::from_config(config)?)),
        other => Err(Error::Config(format!(
            "Unsupported embedding provider '{}'; only 'openai' is supported",
            other
        ))),
    }
}

/// Options for [`embed_stream`]
#[derive(Debug, Clone)]
pub struct EmbedStreamOptions {
    /// Inputs per provider request
    pub batch_size: usize,
    /// Provider requests in flight at once
    pub concurrency: usize,
}

impl Default for EmbedStreamOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 5,
        }
    }
}

/// Embed many texts by splitting them into batches and running up to
/// `concurrency` batches in parallel. Output order matches input order.
pub async fn embed_stream(
    provider: &dyn EmbeddingProvider,
    texts: Vec<String>,
    opts: &EmbedStreamOptions,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = opts.batch_size.max(1);
    let batches: Vec<Vec<String>> = texts
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect();

    // buffered() polls up to `concurrency` futures but yields results in
    // submission order, which keeps vectors aligned with their texts.
    let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
        .map(|batch| async move { provider.embed_batch(&batch).await })
        .buffered(opts.concurrency.max(1))
        .try_collect()
        .await?;

    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic provider: vector = [len, batch-local index]
    struct StubProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 0.0])
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn empty_input_skips_provider() {
        let provider = StubProvider {
            calls: AtomicUsize::new(0),
        };
        let out = embed_stream(&provider, Vec::new(), &EmbedStreamOptions::default())
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batches_preserve_input_order() {
        let provider = StubProvider {
            calls: AtomicUsize::new(0),
        };
        let texts: Vec<String> = (1..=10).map(|n| "x".repeat(n)).collect();
        let opts = EmbedStreamOptions {
            batch_size: 3,
            concurrency: 4,
        };

        let out = embed_stream(&provider, texts, &opts).await.unwrap();

        assert_eq!(out.len(), 10);
        for (i, vector) in out.iter().enumerate() {
            assert_eq!(vector[0], (i + 1) as f32);
        }
        // 10 inputs at batch size 3 -> 4 requests
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }
}

//! Ingestion pipeline
//!
//! Drives one source end to end: fetch documents, skip unchanged content by
//! hash, chunk, embed, and persist. Progress is written after every document
//! so an interrupted run can resume from `last_processed_url`. Per-document
//! failures are counted and logged; only fetcher-level failures abort the
//! source.

use crate::assist::AssistClient;
use crate::chunk::{self, ChunkOptions};
use crate::config::Config;
use crate::embed::{embed_stream, EmbedStreamOptions, EmbeddingProvider};
use crate::error::Result;
use crate::fetch::{self, FetchedDocument};
use crate::store::{NewSource, ProgressStatus, SourceType, Store};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Outcome counters for one ingestion run
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub total: i64,
    pub processed: i64,
    pub skipped: i64,
    pub failed: i64,
}

/// Summary returned by a dry run instead of writing anything
#[derive(Debug, Clone)]
pub struct DryRunReport {
    pub document_count: usize,
    pub total_content_size: usize,
    pub estimated_total_chunks: usize,
    pub documents: Vec<DryRunDocument>,
}

#[derive(Debug, Clone)]
pub struct DryRunDocument {
    pub url: String,
    pub title: String,
    pub content_size: usize,
}

/// Options for [`IngestionPipeline::ingest`]
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Continue from the most recent `in_progress` run, if any
    pub resume: bool,
    /// Fetch and report, but write nothing
    pub dry_run: bool,
}

/// What to ingest: the source definition as given on the command line
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub source_type: SourceType,
    pub base_url: String,
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub options: crate::store::SourceOptions,
}

/// Progress callback invoked after each document (drives the CLI bar)
pub type ProgressFn = Box<dyn Fn(&IngestStats) + Send + Sync>;

pub struct IngestionPipeline<'a> {
    store: &'a Store,
    provider: &'a dyn EmbeddingProvider,
    assist: Option<&'a AssistClient>,
    config: &'a Config,
    chunk_options: ChunkOptions,
    embed_options: EmbedStreamOptions,
    on_progress: Option<ProgressFn>,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(
        store: &'a Store,
        provider: &'a dyn EmbeddingProvider,
        assist: Option<&'a AssistClient>,
        config: &'a Config,
    ) -> Self {
        Self {
            store,
            provider,
            assist,
            config,
            chunk_options: ChunkOptions::default(),
            embed_options: EmbedStreamOptions {
                batch_size: config.embed_batch_size,
                concurrency: config.embed_concurrency,
            },
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Run a full ingestion for one source. Returns `Some(report)` for dry
    /// runs and `None` for real runs.
    pub async fn ingest(
        &self,
        source_config: &SourceConfig,
        options: &IngestOptions,
    ) -> Result<Option<DryRunReport>> {
        fetch::validate_options(source_config.source_type, &source_config.options)?;

        // Skip re-crawling pages the store already holds.
        let existing = self.store.get_source(&source_config.name).await?;
        let mut cached_urls = Vec::new();
        if let Some(source) = &existing {
            if !options.dry_run && source.get_type()? == SourceType::WebCrawl {
                cached_urls = self.store.document_urls(source.id).await?;
            }
        }

        let new_source = NewSource {
            name: source_config.name.clone(),
            source_type: source_config.source_type,
            base_url: source_config.base_url.clone(),
            group_name: source_config.group_name.clone(),
            description: source_config
                .description
                .clone()
                .or_else(|| existing.as_ref().and_then(|s| s.description.clone())),
            options: Some(source_config.options.clone()),
        };

        let documents = fetch::fetch_source(
            self.config,
            source_config.source_type,
            &source_config.base_url,
            &source_config.options,
            &cached_urls,
        )
        .await?;
        info!(
            source = %source_config.name,
            count = documents.len(),
            "Fetched documents"
        );

        if options.dry_run {
            return Ok(Some(dry_run_report(&documents)));
        }

        let mut new_source = new_source;
        if new_source.description.is_none() {
            if let Some(assist) = self.assist {
                let titles: Vec<String> =
                    documents.iter().map(|d| d.title.clone()).collect();
                let description = assist
                    .describe(&source_config.name, &source_config.base_url, &titles)
                    .await;
                new_source.description = Some(description);
            }
        }

        let source_id = self.store.upsert_source(&new_source).await?;
        let stats = self
            .ingest_documents(source_id, documents, options.resume)
            .await?;

        self.store.touch_last_ingested(source_id).await?;

        info!(
            source = %source_config.name,
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "Ingestion complete"
        );
        Ok(None)
    }

    async fn ingest_documents(
        &self,
        source_id: i64,
        documents: Vec<FetchedDocument>,
        resume: bool,
    ) -> Result<IngestStats> {
        // Progress tracking is best-effort: without it ingestion still runs,
        // it just cannot resume.
        let progress = self.resolve_progress(source_id, documents.len() as i64, resume).await;

        // A resumed run continues the previous run's counters.
        let mut stats = IngestStats {
            total: documents.len() as i64,
            processed: progress.as_ref().map(|p| p.processed).unwrap_or(0),
            skipped: progress.as_ref().map(|p| p.skipped).unwrap_or(0),
            failed: progress.as_ref().map(|p| p.failed).unwrap_or(0),
        };

        let documents = match progress.as_ref().and_then(|p| p.resume_after.clone()) {
            Some(last_url) => skip_past(documents, &last_url),
            None => documents,
        };

        for document in documents {
            let url = document.url.clone();

            match self.ingest_one(source_id, document).await {
                Ok(true) => stats.processed += 1,
                Ok(false) => {
                    debug!(url = %url, "Content unchanged, skipping");
                    stats.skipped += 1;
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "Failed to ingest document");
                    stats.failed += 1;
                    if let Some(p) = &progress {
                        let _ = self
                            .store
                            .update_progress(
                                p.id,
                                stats.processed,
                                stats.skipped,
                                stats.failed,
                                Some(&url),
                                Some(&err.to_string()),
                            )
                            .await;
                    }
                    self.report(&stats);
                    continue;
                }
            }

            if let Some(p) = &progress {
                let _ = self
                    .store
                    .update_progress(
                        p.id,
                        stats.processed,
                        stats.skipped,
                        stats.failed,
                        Some(&url),
                        None,
                    )
                    .await;
            }
            self.report(&stats);
        }

        if let Some(p) = &progress {
            let status = if stats.failed > 0 {
                ProgressStatus::CompletedWithErrors
            } else {
                ProgressStatus::Completed
            };
            let _ = self.store.complete_progress(p.id, status).await;
        }

        Ok(stats)
    }

    /// Ingest a single document. Returns `false` when the stored hash
    /// already matches, `true` when chunks were (re)written.
    async fn ingest_one(&self, source_id: i64, document: FetchedDocument) -> Result<bool> {
        let content_hash = sha256_hex(&document.content);

        if let Some(stored) = self.store.document_hash(source_id, &document.url).await? {
            if stored == content_hash {
                return Ok(false);
            }
        }

        let chunks = chunk::chunk_text(&document.content, &self.chunk_options);
        let embeddings =
            embed_stream(self.provider, chunks.clone(), &self.embed_options).await?;

        let document_id = self
            .store
            .upsert_document(
                source_id,
                &document.url,
                &document.title,
                Some(&document.path),
                &document.content,
                &content_hash,
                Some(&document.metadata),
            )
            .await?;

        for (index, (content, embedding)) in chunks.iter().zip(embeddings.iter()).enumerate() {
            self.store
                .insert_chunk(
                    document_id,
                    index as i64,
                    content,
                    embedding,
                    chunk::estimate_tokens(content) as i64,
                )
                .await?;
        }

        Ok(true)
    }

    async fn resolve_progress(
        &self,
        source_id: i64,
        total: i64,
        resume: bool,
    ) -> Option<ProgressHandle> {
        if resume {
            match self.store.get_incomplete_progress(source_id).await {
                Ok(Some(existing)) => {
                    info!(
                        progress_id = existing.id,
                        last_url = ?existing.last_processed_url,
                        "Resuming previous ingestion run"
                    );
                    return Some(ProgressHandle {
                        id: existing.id,
                        resume_after: existing.last_processed_url,
                        processed: existing.processed,
                        skipped: existing.skipped,
                        failed: existing.failed,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "Progress lookup failed, continuing without resume");
                    return None;
                }
            }
        }

        match self.store.create_progress(source_id, total).await {
            Ok(id) => Some(ProgressHandle {
                id,
                resume_after: None,
                processed: 0,
                skipped: 0,
                failed: 0,
            }),
            Err(err) => {
                warn!(error = %err, "Progress tracking unavailable, continuing without it");
                None
            }
        }
    }

    fn report(&self, stats: &IngestStats) {
        if let Some(on_progress) = &self.on_progress {
            on_progress(stats);
        }
    }
}

struct ProgressHandle {
    id: i64,
    resume_after: Option<String>,
    processed: i64,
    skipped: i64,
    failed: i64,
}

/// Drop documents up to and including `last_url`; the previous run already
/// accounted for them. If the URL is not found the full list is returned
/// untouched.
fn skip_past(documents: Vec<FetchedDocument>, last_url: &str) -> Vec<FetchedDocument> {
    match documents.iter().position(|d| d.url == last_url) {
        Some(index) => documents.into_iter().skip(index + 1).collect(),
        None => documents,
    }
}

fn dry_run_report(documents: &[FetchedDocument]) -> DryRunReport {
    let total_content_size = documents.iter().map(|d| d.content.len()).sum();
    let estimated_total_chunks = documents
        .iter()
        .map(|d| d.content.len().div_ceil(1000))
        .sum();

    DryRunReport {
        document_count: documents.len(),
        total_content_size,
        estimated_total_chunks,
        documents: documents
            .iter()
            .map(|d| DryRunDocument {
                url: d.url.clone(),
                title: d.title.clone(),
                content_size: d.content.len(),
            })
            .collect(),
    }
}

/// Lowercase hex SHA-256 of the content
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(url: &str) -> FetchedDocument {
        FetchedDocument::new(url.to_string(), "T".to_string(), "body".to_string())
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        let hash = sha256_hex("cats dogs birds");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // One changed byte flips the hash.
        assert_ne!(hash, sha256_hex("cats dogs birdz"));
        assert_eq!(hash, sha256_hex("cats dogs birds"));
    }

    #[test]
    fn skip_past_drops_through_last_url() {
        let docs = vec![doc("https://d/1"), doc("https://d/2"), doc("https://d/3")];
        let rest = skip_past(docs, "https://d/2");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].url, "https://d/3");
    }

    #[test]
    fn skip_past_with_unknown_url_keeps_everything() {
        let docs = vec![doc("https://d/1"), doc("https://d/2")];
        let rest = skip_past(docs, "https://d/999");
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn dry_run_estimates_chunks_per_kilobyte() {
        let mut a = doc("https://d/1");
        a.content = "x".repeat(2500);
        let mut b = doc("https://d/2");
        b.content = "x".repeat(100);

        let report = dry_run_report(&[a, b]);
        assert_eq!(report.document_count, 2);
        assert_eq!(report.total_content_size, 2600);
        // ceil(2500/1000) + ceil(100/1000) = 3 + 1
        assert_eq!(report.estimated_total_chunks, 4);
    }
}

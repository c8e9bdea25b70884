//! Persistent storage using SQLite
//!
//! One database file holds everything: sources, documents, chunks with their
//! embeddings, the FTS5 mirror used for lexical search, and ingestion
//! progress. Vector similarity comes from the sqlite-vec extension, which is
//! registered process-wide before the first connection opens.

mod schema;

pub use schema::*;

use crate::config::DatabaseLocation;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::os::raw::{c_char, c_int};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    LinkManifest,
    WebCrawl,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::LinkManifest => write!(f, "link_manifest"),
            SourceType::WebCrawl => write!(f, "web_crawl"),
        }
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "link_manifest" => Ok(SourceType::LinkManifest),
            "web_crawl" => Ok(SourceType::WebCrawl),
            _ => Err(Error::Validation(format!("Unknown source type: {}", s))),
        }
    }
}

/// Per-source ingestion options stored as JSON in `sources.options`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_limit: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_optional: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_paths: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_paths: Option<Vec<String>>,

    /// Older writers stored the description here; it is migrated into the
    /// dedicated column when the row is read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Input for [`Store::upsert_source`]
#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub source_type: SourceType,
    pub base_url: String,
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub options: Option<SourceOptions>,
}

/// A registered documentation source
#[derive(Debug, Clone, FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub source_type: String,
    pub base_url: String,
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub options: Option<String>,
    pub last_ingested_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Source {
    pub fn get_type(&self) -> Result<SourceType> {
        self.source_type.parse()
    }

    pub fn get_options(&self) -> SourceOptions {
        self.options
            .as_ref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// Move a legacy `options.description` into the dedicated column.
    fn migrate_legacy_description(mut self) -> Self {
        if self.description.is_none() {
            let mut opts = self.get_options();
            if let Some(desc) = opts.description.take() {
                self.description = Some(desc);
                self.options = serde_json::to_string(&opts).ok();
            }
        }
        self
    }
}

/// A stored document
#[derive(Debug, Clone, FromRow)]
pub struct Document {
    pub id: i64,
    pub source_id: i64,
    pub url: String,
    pub title: String,
    pub path: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub metadata: Option<String>,
    pub updated_at: String,
}

/// A single chunk-level search hit. `distance` is cosine distance for the
/// vector leg and `abs(bm25)` for the lexical leg; smaller is better in both.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub url: String,
    pub title: String,
    pub path: Option<String>,
    pub distance: f64,
}

/// Filters shared by both search legs
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Restrict to a source by name
    pub source: Option<String>,
    /// Restrict to documents whose path starts with this prefix
    pub path_prefix: Option<String>,
    /// Restrict to documents whose metadata section matches exactly
    pub section: Option<String>,
    pub limit: usize,
}

/// Ingestion progress status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    InProgress,
    Completed,
    CompletedWithErrors,
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressStatus::InProgress => write!(f, "in_progress"),
            ProgressStatus::Completed => write!(f, "completed"),
            ProgressStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
        }
    }
}

/// An ingestion progress row
#[derive(Debug, Clone, FromRow)]
pub struct Progress {
    pub id: i64,
    pub source_id: i64,
    pub started_at: String,
    pub total: i64,
    pub processed: i64,
    pub skipped: i64,
    pub failed: i64,
    pub status: String,
    pub last_processed_url: Option<String>,
    pub error_message: Option<String>,
}

/// Documentation database handle
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database and bring the schema up to date.
    pub async fn open(location: &DatabaseLocation) -> Result<Self> {
        register_vec_extension()?;

        let in_memory = matches!(location, DatabaseLocation::InMemory);
        let options = match location {
            DatabaseLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                debug!("Opening database at {:?}", path);
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            }
            // WAL does not apply to in-memory databases.
            DatabaseLocation::InMemory => SqliteConnectOptions::new().in_memory(true),
        }
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

        // An in-memory database exists per connection; the pool must not
        // open a second one or let the only one go idle-closed.
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(5);
        }

        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open a throwaway in-memory database (used by tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(&DatabaseLocation::InMemory).await
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;

        for migration in MIGRATIONS {
            if let Err(err) = sqlx::query(migration).execute(&self.pool).await {
                let message = err.to_string();
                if message.contains("duplicate column name") {
                    continue;
                }
                return Err(err.into());
            }
        }

        Ok(())
    }

    // ===== Source operations =====

    /// Insert or update a source by name. Returns the source id.
    pub async fn upsert_source(&self, source: &NewSource) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let options_json = source
            .options
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sources (name, source_type, base_url, group_name, description, options, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                source_type = excluded.source_type,
                base_url = excluded.base_url,
                group_name = excluded.group_name,
                description = excluded.description,
                options = excluded.options,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&source.name)
        .bind(source.source_type.to_string())
        .bind(&source.base_url)
        .bind(&source.group_name)
        .bind(&source.description)
        .bind(&options_json)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Get a source by name
    pub async fn get_source(&self, name: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source.map(Source::migrate_legacy_description))
    }

    /// List all sources ordered by name
    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources
            .into_iter()
            .map(Source::migrate_legacy_description)
            .collect())
    }

    /// Delete a source and everything hanging off it. Returns whether a
    /// source row was actually removed.
    pub async fn remove_source(&self, name: &str) -> Result<bool> {
        let Some(source) = self.get_source(name).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE source_id = ?)",
        )
        .bind(source.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM documents WHERE source_id = ?")
            .bind(source.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM ingestion_progress WHERE source_id = ?")
            .bind(source.id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(source = %name, "Removed source");
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_source_description(&self, id: i64, description: &str) -> Result<()> {
        sqlx::query("UPDATE sources SET description = ?, updated_at = ? WHERE id = ?")
            .bind(description)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch_last_ingested(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE sources SET last_ingested_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== Group operations =====

    /// A group exists iff at least one source carries the group name and no
    /// source shadows it with its own name.
    pub async fn is_group(&self, name: &str) -> Result<bool> {
        let result: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM sources WHERE group_name = ?1)
               AND NOT EXISTS(SELECT 1 FROM sources WHERE name = ?1)
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }

    /// All sources belonging to a group, ordered by name
    pub async fn sources_by_group(&self, name: &str) -> Result<Vec<Source>> {
        let sources =
            sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE group_name = ? ORDER BY name")
                .bind(name)
                .fetch_all(&self.pool)
                .await?;
        Ok(sources
            .into_iter()
            .map(Source::migrate_legacy_description)
            .collect())
    }

    /// Remove every source in a group. Returns whether anything was removed.
    pub async fn remove_group(&self, name: &str) -> Result<bool> {
        let sources = self.sources_by_group(name).await?;
        if sources.is_empty() {
            return Ok(false);
        }
        for source in sources {
            self.remove_source(&source.name).await?;
        }
        Ok(true)
    }

    // ===== Document operations =====

    /// Insert or update a document. Any existing chunks for the document are
    /// deleted in the same transaction so stale embeddings cannot outlive a
    /// content change. Returns the document id.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_document(
        &self,
        source_id: i64,
        url: &str,
        title: &str,
        path: Option<&str>,
        content: &str,
        content_hash: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let metadata_json = metadata.map(|m| m.to_string());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM chunks WHERE document_id IN
                (SELECT id FROM documents WHERE source_id = ? AND url = ?)
            "#,
        )
        .bind(source_id)
        .bind(url)
        .execute(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (source_id, url, title, path, content, content_hash, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, url) DO UPDATE SET
                title = excluded.title,
                path = excluded.path,
                content = excluded.content,
                content_hash = excluded.content_hash,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(source_id)
        .bind(url)
        .bind(title)
        .bind(path)
        .bind(content)
        .bind(content_hash)
        .bind(&metadata_json)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Stored content hash for a document, if present
    pub async fn document_hash(&self, source_id: i64, url: &str) -> Result<Option<String>> {
        let hash = sqlx::query_scalar(
            "SELECT content_hash FROM documents WHERE source_id = ? AND url = ?",
        )
        .bind(source_id)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    /// All document URLs for a source
    pub async fn document_urls(&self, source_id: i64) -> Result<Vec<String>> {
        let urls = sqlx::query_scalar("SELECT url FROM documents WHERE source_id = ? ORDER BY url")
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(urls)
    }

    /// Fetch documents by id. Order of the result is unspecified; callers
    /// that care about ranking re-order by their own key.
    pub async fn get_documents_by_ids(&self, ids: &[i64]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT id, source_id, url, title, path, content, content_hash, metadata, updated_at \
             FROM documents WHERE id IN ({})",
            placeholders
        );

        let mut q = sqlx::query_as::<_, Document>(&query);
        for id in ids {
            q = q.bind(id);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    // ===== Chunk operations =====

    /// Insert a chunk; a conflicting `(document_id, chunk_index)` is
    /// overwritten. The embedding is stored as little-endian f32 bytes.
    pub async fn insert_chunk(
        &self,
        document_id: i64,
        chunk_index: i64,
        content: &str,
        embedding: &[f32],
        token_count: i64,
    ) -> Result<()> {
        let blob: &[u8] = bytemuck::cast_slice(embedding);

        sqlx::query(
            r#"
            INSERT INTO chunks (document_id, chunk_index, content, embedding, token_count)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(document_id, chunk_index) DO UPDATE SET
                content = excluded.content,
                embedding = excluded.embedding,
                token_count = excluded.token_count
            "#,
        )
        .bind(document_id)
        .bind(chunk_index)
        .bind(content)
        .bind(blob.to_vec())
        .bind(token_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_chunks(&self, document_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ===== Search =====

    /// Nearest chunks by cosine distance, ascending
    pub async fn vector_search(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkHit>> {
        let query_vec = serde_json::to_string(embedding)?;

        let hits = sqlx::query_as::<_, ChunkHit>(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.chunk_index, c.content,
                   d.url, d.title, d.path,
                   vec_distance_cosine(c.embedding, vec_f32(?1)) AS distance
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            JOIN sources s ON s.id = d.source_id
            WHERE (?2 IS NULL OR s.name = ?2)
              AND (?3 IS NULL OR d.path LIKE ?3 || '%')
              AND (?4 IS NULL OR json_extract(d.metadata, '$.section') = ?4)
            ORDER BY distance
            LIMIT ?5
            "#,
        )
        .bind(&query_vec)
        .bind(filters.source.as_deref())
        .bind(filters.path_prefix.as_deref())
        .bind(filters.section.as_deref())
        .bind(filters.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(hits)
    }

    /// BM25 matches over the FTS mirror, best first. BM25 scores are
    /// negative in SQLite; the absolute value lands in `distance`.
    pub async fn lexical_search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<ChunkHit>> {
        let fts_query = prepare_fts_query(query);

        let hits = sqlx::query_as::<_, ChunkHit>(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.chunk_index, c.content,
                   d.url, d.title, d.path,
                   abs(bm25(chunks_fts)) AS distance
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            JOIN documents d ON d.id = c.document_id
            JOIN sources s ON s.id = d.source_id
            WHERE chunks_fts MATCH ?1
              AND (?2 IS NULL OR s.name = ?2)
              AND (?3 IS NULL OR d.path LIKE ?3 || '%')
              AND (?4 IS NULL OR json_extract(d.metadata, '$.section') = ?4)
            ORDER BY bm25(chunks_fts)
            LIMIT ?5
            "#,
        )
        .bind(&fts_query)
        .bind(filters.source.as_deref())
        .bind(filters.path_prefix.as_deref())
        .bind(filters.section.as_deref())
        .bind(filters.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(hits)
    }

    // ===== Progress operations =====

    /// Most recent `in_progress` row for a source. Duplicate in-progress
    /// rows can exist; the latest one wins.
    pub async fn get_incomplete_progress(&self, source_id: i64) -> Result<Option<Progress>> {
        let progress = sqlx::query_as::<_, Progress>(
            r#"
            SELECT * FROM ingestion_progress
            WHERE source_id = ? AND status = 'in_progress'
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(progress)
    }

    pub async fn create_progress(&self, source_id: i64, total: i64) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ingestion_progress (source_id, started_at, total, status)
            VALUES (?, ?, ?, 'in_progress')
            RETURNING id
            "#,
        )
        .bind(source_id)
        .bind(Utc::now().to_rfc3339())
        .bind(total)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn update_progress(
        &self,
        id: i64,
        processed: i64,
        skipped: i64,
        failed: i64,
        last_processed_url: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_progress
            SET processed = ?, skipped = ?, failed = ?,
                last_processed_url = COALESCE(?, last_processed_url),
                error_message = COALESCE(?, error_message)
            WHERE id = ?
            "#,
        )
        .bind(processed)
        .bind(skipped)
        .bind(failed)
        .bind(last_processed_url)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_progress(&self, id: i64, status: ProgressStatus) -> Result<()> {
        if status == ProgressStatus::InProgress {
            warn!(progress_id = id, "complete_progress called with in_progress status");
        }
        sqlx::query("UPDATE ingestion_progress SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Rewrite a user query for FTS5: strip operator characters, quote each
/// term, add `*` for prefix matching, and OR everything together. Broad
/// recall is intentional; rank fusion downweights the noise.
pub fn prepare_fts_query(raw: &str) -> String {
    const STRIP: &[char] = &['"', '(', ')', '*', '-', '+', ':', '^'];

    let cleaned: String = raw
        .chars()
        .map(|c| if STRIP.contains(&c) { ' ' } else { c })
        .collect();

    let terms: Vec<String> = cleaned
        .split_whitespace()
        .map(|term| format!("\"{}\"*", term))
        .collect();

    if terms.is_empty() {
        "\"\"".to_string()
    } else {
        terms.join(" OR ")
    }
}

/// Register sqlite-vec for every future connection in this process.
fn register_vec_extension() -> Result<()> {
    static REGISTERED: OnceLock<std::result::Result<(), String>> = OnceLock::new();

    let outcome = REGISTERED.get_or_init(|| unsafe {
        type ExtensionInit = unsafe extern "C" fn(
            *mut libsqlite3_sys::sqlite3,
            *mut *mut c_char,
            *const libsqlite3_sys::sqlite3_api_routines,
        ) -> c_int;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init_fn: ExtensionInit =
            std::mem::transmute::<unsafe extern "C" fn(), ExtensionInit>(init);
        let rc = libsqlite3_sys::sqlite3_auto_extension(Some(init_fn));
        if rc != 0 {
            Err(format!("failed to register sqlite-vec extension (code {rc})"))
        } else {
            Ok(())
        }
    });

    outcome.clone().map_err(Error::Other)
}

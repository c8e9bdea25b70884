//! Configuration management for mcp-docs
//!
//! All configuration comes from environment variables so the server can run
//! as a zero-argument stdio subprocess. Logging goes to stderr exclusively;
//! stdout carries the tool-call transport.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Where the database lives, resolved from `DATABASE_URL` or the XDG data dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    InMemory,
}

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseLocation,

    /// Embedding provider name (`openai` or an OpenAI-compatible endpoint)
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embed_batch_size: usize,
    pub embed_concurrency: usize,

    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub summary_model: String,

    /// Crawl vendor API endpoint and key (optional; web_crawl sources need them)
    pub crawl_api_url: Option<String>,
    pub crawl_api_key: Option<String>,

    pub cache_max_size: usize,
    pub cache_ttl_secs: u64,
}

impl Config {
    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let database = resolve_database_location()?;

        let embedding_dimensions = match std::env::var("EMBEDDING_DIMENSIONS") {
            Ok(raw) => raw
                .parse::<usize>()
                .map_err(|_| Error::Config(format!("Invalid EMBEDDING_DIMENSIONS: {}", raw)))?,
            Err(_) => default_embedding_dimensions(),
        };

        Ok(Self {
            database,
            embedding_provider: env_or("EMBEDDING_PROVIDER", default_embedding_provider),
            embedding_model: env_or("EMBEDDING_MODEL", default_embedding_model),
            embedding_dimensions,
            embed_batch_size: default_embed_batch_size(),
            embed_concurrency: default_embed_concurrency(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_base_url: env_or("OPENAI_BASE_URL", default_openai_base_url),
            summary_model: env_or("SUMMARY_MODEL", default_summary_model),
            crawl_api_url: std::env::var("CRAWL_API_URL").ok(),
            crawl_api_key: std::env::var("CRAWL_API_KEY").ok(),
            cache_max_size: default_cache_max_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
        })
    }
}

fn env_or(key: &str, fallback: fn() -> String) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback())
}

/// Resolve the database location from, in order of priority:
/// 1. The `DATABASE_URL` environment variable (`file:…`, a plain path, or `:memory:`)
/// 2. `$XDG_DATA_HOME/mcp-docs/docs.db` (falling back to `~/.local/share`)
pub fn resolve_database_location() -> Result<DatabaseLocation> {
    if let Ok(raw) = std::env::var("DATABASE_URL") {
        let trimmed = raw.trim();
        if trimmed == ":memory:" || trimmed == "file::memory:" {
            return Ok(DatabaseLocation::InMemory);
        }
        let path = trimmed.strip_prefix("file:").unwrap_or(trimmed);
        if path.is_empty() {
            return Err(Error::Config(format!("Invalid DATABASE_URL: {}", raw)));
        }
        return Ok(DatabaseLocation::File(PathBuf::from(path)));
    }

    let data_home = xdg::BaseDirectories::with_prefix("mcp-docs")
        .get_data_home()
        .ok_or_else(|| Error::Config("could not determine XDG data home directory".into()))?;
    std::fs::create_dir_all(&data_home)?;
    Ok(DatabaseLocation::File(data_home.join("docs.db")))
}

/// Initialize the tracing subscriber from `LOG_LEVEL` / `LOG_FORMAT`.
///
/// All log output goes to stderr; stdout is reserved for the MCP transport.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test because DATABASE_URL is process-global state.
    #[test]
    fn database_url_forms() {
        std::env::set_var("DATABASE_URL", ":memory:");
        assert_eq!(resolve_database_location().unwrap(), DatabaseLocation::InMemory);

        std::env::set_var("DATABASE_URL", "file:/tmp/docs-test.db");
        assert_eq!(
            resolve_database_location().unwrap(),
            DatabaseLocation::File(PathBuf::from("/tmp/docs-test.db"))
        );

        std::env::set_var("DATABASE_URL", "/tmp/plain.db");
        assert_eq!(
            resolve_database_location().unwrap(),
            DatabaseLocation::File(PathBuf::from("/tmp/plain.db"))
        );
        std::env::remove_var("DATABASE_URL");
    }
}

//! Document fetching
//!
//! Both source types produce the same document shape: the link-manifest
//! fetcher walks an `llms.txt`-style outline and fetches each linked page,
//! while the web-crawl fetcher drives an asynchronous crawl job through a
//! vendor API. The ingestion pipeline does not care which one ran.

mod crawl;
mod manifest;

pub use crawl::{CrawlClient, CrawlOptions};
pub use manifest::{fetch_manifest, parse_manifest, ManifestEntry};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{SourceOptions, SourceType};
use serde_json::json;
use url::Url;

/// A fetched page, normalized for ingestion
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub title: String,
    pub content: String,
    pub path: String,
    pub metadata: serde_json::Value,
}

impl FetchedDocument {
    pub fn new(url: String, title: String, content: String) -> Self {
        let path = path_from_url(&url);
        Self {
            url,
            title,
            content,
            path,
            metadata: json!({}),
        }
    }
}

/// Derive the storage path for a URL: the URL path with the leading `/` and
/// a trailing `.md` stripped; the root maps to `"index"`.
pub fn path_from_url(url: &str) -> String {
    let raw_path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());

    let trimmed = raw_path
        .trim_start_matches('/')
        .trim_end_matches(".md")
        .to_string();

    if trimmed.is_empty() {
        "index".to_string()
    } else {
        trimmed
    }
}

/// Fetch every document for a source, dispatching on its type.
///
/// `cached_urls` lets the web-crawl path skip pages the store already holds;
/// the manifest path ignores it because manifests are cheap to re-walk.
pub async fn fetch_source(
    config: &Config,
    source_type: SourceType,
    base_url: &str,
    options: &SourceOptions,
    cached_urls: &[String],
) -> Result<Vec<FetchedDocument>> {
    match source_type {
        SourceType::LinkManifest => {
            fetch_manifest(base_url, options.include_optional.unwrap_or(false)).await
        }
        SourceType::WebCrawl => {
            let client = CrawlClient::from_config(config)?;
            let crawl_options = CrawlOptions {
                crawl_limit: options
                    .crawl_limit
                    .unwrap_or_else(crate::config::default_crawl_limit),
                include_paths: options.include_paths.clone().unwrap_or_default(),
                exclude_paths: options.exclude_paths.clone().unwrap_or_default(),
                cached_urls: cached_urls.to_vec(),
            };
            client.fetch(base_url, &crawl_options).await
        }
    }
}

/// Validate crawl options before a source row is written
pub fn validate_options(source_type: SourceType, options: &SourceOptions) -> Result<()> {
    if source_type == SourceType::WebCrawl {
        if let Some(0) = options.crawl_limit {
            return Err(Error::Validation("crawl limit must be at least 1".to_string()));
        }
    }
    Ok(())
}

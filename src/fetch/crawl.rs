//! Web-crawl fetching through an asynchronous crawl vendor API
//!
//! The vendor exposes a job-based API: POST starts a crawl that returns
//! markdown with main-content extraction, and the job is polled until it
//! reports `completed`. Pages the store already holds are excluded up front
//! by turning their URLs into path patterns.

use super::{path_from_url, FetchedDocument};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::markdown;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

static TITLE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[-–—|]\s*(documentation|docs)\s*$").unwrap());

static COOKIE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)cookie").unwrap());

/// Options for one crawl job
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub crawl_limit: u32,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    /// URLs already stored for this source; same-host entries become
    /// exclude patterns so the crawler skips work the store already holds.
    pub cached_urls: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CrawlRequest<'a> {
    url: &'a str,
    limit: u32,
    #[serde(rename = "includePaths", skip_serializing_if = "Vec::is_empty")]
    include_paths: Vec<String>,
    #[serde(rename = "excludePaths", skip_serializing_if = "Vec::is_empty")]
    exclude_paths: Vec<String>,
    #[serde(rename = "scrapeOptions")]
    scrape_options: ScrapeOptions,
}

#[derive(Debug, Serialize)]
struct ScrapeOptions {
    formats: Vec<&'static str>,
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
}

#[derive(Debug, Deserialize)]
struct CrawlStarted {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CrawlStatus {
    status: String,
    #[serde(default)]
    completed: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    data: Vec<CrawlPage>,
}

#[derive(Debug, Deserialize)]
struct CrawlPage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    metadata: CrawlPageMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct CrawlPageMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "sourceURL")]
    source_url: Option<String>,
    #[serde(default, rename = "ogUrl")]
    og_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Client for the crawl vendor API
pub struct CrawlClient {
    client: Client,
    api_url: String,
}

impl CrawlClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_url = config
            .crawl_api_url
            .clone()
            .ok_or_else(|| Error::Config("CRAWL_API_URL is not set".to_string()))?;

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &config.crawl_api_key {
            let value = format!("Bearer {}", key);
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&value)
                    .map_err(|_| Error::Config("Invalid CRAWL_API_KEY".to_string()))?,
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Run a crawl job to completion and return its pages as documents.
    pub async fn fetch(&self, base_url: &str, options: &CrawlOptions) -> Result<Vec<FetchedDocument>> {
        let exclude_paths = merge_exclusions(base_url, options)?;

        let request = CrawlRequest {
            url: base_url,
            limit: options.crawl_limit,
            include_paths: options.include_paths.clone(),
            exclude_paths,
            scrape_options: ScrapeOptions {
                formats: vec!["markdown"],
                only_main_content: true,
            },
        };

        info!(url = %base_url, limit = options.crawl_limit, "Starting crawl job");
        let started: CrawlStarted = self
            .client
            .post(format!("{}/crawl", self.api_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Fetch(format!("crawl start failed: {}", e)))?
            .json()
            .await?;

        let status = self.poll(&started.id).await?;
        let base = Url::parse(base_url)?;

        Ok(status
            .data
            .into_iter()
            .filter_map(|page| transform_page(page, &base))
            .collect())
    }

    async fn poll(&self, job_id: &str) -> Result<CrawlStatus> {
        let status_url = format!("{}/crawl/{}", self.api_url, job_id);
        let mut last_completed = 0u64;

        loop {
            let status: CrawlStatus = self
                .client
                .get(&status_url)
                .send()
                .await?
                .error_for_status()
                .map_err(|e| Error::Fetch(format!("crawl status failed: {}", e)))?
                .json()
                .await?;

            if status.completed > last_completed {
                info!(
                    completed = status.completed,
                    total = status.total,
                    "Crawl progress"
                );
                last_completed = status.completed;
            }

            match status.status.as_str() {
                "completed" => return Ok(status),
                "failed" | "cancelled" => {
                    return Err(Error::Fetch(format!(
                        "crawl job {} ended with status '{}'",
                        job_id, status.status
                    )));
                }
                _ => {
                    debug!(status = %status.status, "Crawl still running");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }
}

/// Union configured exclusions with path patterns for same-host cached URLs.
fn merge_exclusions(base_url: &str, options: &CrawlOptions) -> Result<Vec<String>> {
    let base = Url::parse(base_url)?;
    let base_host = base.host_str().unwrap_or_default();

    let mut merged: BTreeSet<String> = options.exclude_paths.iter().cloned().collect();
    for cached in &options.cached_urls {
        let Ok(url) = Url::parse(cached) else {
            continue;
        };
        if url.host_str() == Some(base_host) && !url.path().is_empty() {
            merged.insert(url.path().to_string());
        }
    }

    Ok(merged.into_iter().collect())
}

/// Map a crawl page to the shared document shape. Pages without markdown or
/// a resolvable URL are dropped with a warning.
fn transform_page(page: CrawlPage, base: &Url) -> Option<FetchedDocument> {
    let url = page
        .metadata
        .source_url
        .clone()
        .or_else(|| page.metadata.og_url.clone())
        .or_else(|| page.metadata.url.clone())
        .or_else(|| page.url.clone())?;

    let Some(raw_markdown) = page.markdown else {
        warn!(url = %url, "Crawled page had no markdown, skipping");
        return None;
    };

    let content = markdown::clean(&raw_markdown);
    if content.is_empty() {
        warn!(url = %url, "Crawled page was empty after cleanup, skipping");
        return None;
    }

    let title = page
        .metadata
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| first_heading(&raw_markdown))
        .unwrap_or_else(|| "Untitled".to_string());
    let title = TITLE_SUFFIX.replace(&title, "").to_string();

    let path = derive_path(&url, base);

    Some(FetchedDocument {
        path,
        metadata: json!({}),
        title,
        url,
        content,
    })
}

/// First `# ` heading that is not cookie-banner text
fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .filter_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .find(|heading| !heading.is_empty() && !COOKIE_HEADING.is_match(heading))
        .map(str::to_string)
}

/// Path relative to the crawl base; out-of-host pages keep their full
/// pathname.
fn derive_path(url: &str, base: &Url) -> String {
    match Url::parse(url) {
        Ok(parsed) if parsed.host_str() != base.host_str() => {
            let trimmed = parsed.path().trim_start_matches('/').trim_end_matches(".md");
            if trimmed.is_empty() {
                "index".to_string()
            } else {
                trimmed.to_string()
            }
        }
        _ => path_from_url(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_with_cached(cached: Vec<&str>) -> CrawlOptions {
        CrawlOptions {
            crawl_limit: 100,
            include_paths: Vec::new(),
            exclude_paths: vec!["/archive/*".to_string()],
            cached_urls: cached.into_iter().map(str::to_string).collect(),
        }
    }

    #[test]
    fn cached_urls_become_exclude_patterns() {
        let options = options_with_cached(vec![
            "https://docs.test/guide/setup",
            "https://other.test/elsewhere",
        ]);
        let merged = merge_exclusions("https://docs.test/", &options).unwrap();

        assert!(merged.contains(&"/guide/setup".to_string()));
        assert!(merged.contains(&"/archive/*".to_string()));
        // Different host does not leak into the exclusions.
        assert!(!merged.iter().any(|p| p.contains("elsewhere")));
    }

    #[test]
    fn transform_prefers_metadata_title() {
        let base = Url::parse("https://docs.test/").unwrap();
        let page = CrawlPage {
            url: None,
            markdown: Some("# Fallback Heading\n\nBody".to_string()),
            metadata: CrawlPageMetadata {
                title: Some("Real Title – Documentation".to_string()),
                source_url: Some("https://docs.test/guide".to_string()),
                og_url: None,
                url: None,
            },
        };

        let doc = transform_page(page, &base).unwrap();
        assert_eq!(doc.title, "Real Title");
        assert_eq!(doc.url, "https://docs.test/guide");
        assert_eq!(doc.path, "guide");
    }

    #[test]
    fn transform_falls_back_to_first_non_cookie_heading() {
        let base = Url::parse("https://docs.test/").unwrap();
        let page = CrawlPage {
            url: Some("https://docs.test/page".to_string()),
            markdown: Some("# Cookie Notice\n\n# Actual Page\n\nBody".to_string()),
            metadata: CrawlPageMetadata::default(),
        };

        let doc = transform_page(page, &base).unwrap();
        assert_eq!(doc.title, "Actual Page");
    }

    #[test]
    fn transform_without_heading_is_untitled() {
        let base = Url::parse("https://docs.test/").unwrap();
        let page = CrawlPage {
            url: Some("https://docs.test/page".to_string()),
            markdown: Some("Plain body text only.".to_string()),
            metadata: CrawlPageMetadata::default(),
        };

        let doc = transform_page(page, &base).unwrap();
        assert_eq!(doc.title, "Untitled");
    }

    #[test]
    fn transform_drops_pages_without_markdown() {
        let base = Url::parse("https://docs.test/").unwrap();
        let page = CrawlPage {
            url: Some("https://docs.test/page".to_string()),
            markdown: None,
            metadata: CrawlPageMetadata::default(),
        };
        assert!(transform_page(page, &base).is_none());
    }

    #[test]
    fn out_of_host_pages_keep_full_pathname() {
        let base = Url::parse("https://docs.test/").unwrap();
        assert_eq!(derive_path("https://other.test/deep/page", &base), "deep/page");
        assert_eq!(derive_path("https://docs.test/local", &base), "local");
    }

    #[test]
    fn docs_suffix_variants_are_stripped() {
        assert_eq!(TITLE_SUFFIX.replace("API Guide - Docs", ""), "API Guide");
        assert_eq!(TITLE_SUFFIX.replace("API Guide | Documentation", ""), "API Guide");
        assert_eq!(TITLE_SUFFIX.replace("Documentation Standards", ""), "Documentation Standards");
    }
}

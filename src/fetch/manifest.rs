//! Link-manifest (`llms.txt`) fetching
//!
//! A link manifest is a markdown outline: `## Section` headers group
//! `- [Title](URL): description` bullets, and sections whose name contains
//! "optional" mark their entries as skippable. Every linked page is fetched
//! individually; a failed page never fails the batch.

use super::{path_from_url, FetchedDocument};
use crate::error::{Error, Result};
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

static ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*-\s*\[([^\]]+)\]\(([^)\s]+)\)\s*(?::\s*(.*?)\s*)?$").unwrap()
});

static SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^##\s+(.+?)\s*$").unwrap());
static TOP_HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\s+(.+?)\s*$").unwrap());

/// One parsed manifest bullet
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub title: String,
    pub url: String,
    pub section: Option<String>,
    pub description: Option<String>,
    pub optional: bool,
}

/// Parse a manifest document. Scheme-less entry URLs are resolved against
/// `manifest_url`: absolute paths against its origin, relative paths against
/// the manifest location itself.
pub fn parse_manifest(content: &str, manifest_url: &str) -> Result<Vec<ManifestEntry>> {
    let base = Url::parse(manifest_url)?;

    let mut entries = Vec::new();
    let mut section: Option<String> = None;
    let mut optional = false;

    for line in content.lines() {
        if let Some(caps) = SECTION.captures(line) {
            let name = caps[1].to_string();
            optional = name.to_lowercase().contains("optional");
            section = Some(name);
            continue;
        }

        // A lone top-level header names the default section, but only while
        // no `##` section has been seen.
        if let Some(caps) = TOP_HEADER.captures(line) {
            if section.is_none() {
                section = Some(caps[1].to_string());
            }
            continue;
        }

        if let Some(caps) = ENTRY.captures(line) {
            let raw_url = &caps[2];
            let resolved = match Url::parse(raw_url) {
                Ok(url) => url,
                Err(url::ParseError::RelativeUrlWithoutBase) => base.join(raw_url)?,
                Err(err) => return Err(err.into()),
            };

            entries.push(ManifestEntry {
                title: caps[1].trim().to_string(),
                url: resolved.to_string(),
                section: section.clone(),
                description: caps
                    .get(3)
                    .map(|m| m.as_str().to_string())
                    .filter(|d| !d.is_empty()),
                optional,
            });
        }
    }

    Ok(entries)
}

/// Fetch the manifest at `manifest_url` and then every entry it lists.
pub async fn fetch_manifest(
    manifest_url: &str,
    include_optional: bool,
) -> Result<Vec<FetchedDocument>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .gzip(true)
        .build()?;

    debug!(url = %manifest_url, "Fetching link manifest");
    let manifest = client
        .get(manifest_url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::Fetch(format!("manifest fetch failed: {}", e)))?
        .text()
        .await?;

    let entries = parse_manifest(&manifest, manifest_url)?;
    debug!(count = entries.len(), "Parsed manifest entries");

    let mut documents = Vec::new();
    for entry in entries {
        if entry.optional && !include_optional {
            continue;
        }

        match fetch_entry(&client, &entry).await {
            Ok(doc) => documents.push(doc),
            Err(err) => {
                warn!(url = %entry.url, error = %err, "Skipping manifest entry");
            }
        }
    }

    Ok(documents)
}

/// GET one entry; on a non-2xx response retry once with `.md` appended.
async fn fetch_entry(client: &Client, entry: &ManifestEntry) -> Result<FetchedDocument> {
    let (url, content) = match fetch_text(client, &entry.url).await {
        Ok(content) => (entry.url.clone(), content),
        Err(err) if !entry.url.ends_with(".md") => {
            let fallback = format!("{}.md", entry.url);
            debug!(url = %fallback, "Retrying with .md extension");
            match fetch_text(client, &fallback).await {
                Ok(content) => (fallback, content),
                Err(_) => return Err(err),
            }
        }
        Err(err) => return Err(err),
    };

    Ok(FetchedDocument {
        path: path_from_url(&url),
        metadata: json!({
            "section": entry.section,
            "description": entry.description,
        }),
        title: entry.title.clone(),
        url,
        content,
    })
}

async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Fetch(format!("HTTP {} for {}", status, url)));
    }
    Ok(response.text().await?)
}

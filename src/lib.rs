//! mcp-docs -- a local documentation search engine with an MCP tool surface.
//!
//! Documentation is pulled from two kinds of sources: curated link manifests
//! (`llms.txt`-style outlines) and crawled sites. Pages are cleaned, chunked,
//! embedded, and stored in a single SQLite database that serves both vector
//! similarity (sqlite-vec) and lexical full-text (FTS5) queries. Search runs
//! both legs in parallel and fuses them with Reciprocal Rank Fusion.
//!
//! # Architecture
//!
//! - [`store`] -- all persistent state: sources, documents, chunks with
//!   embeddings, the FTS mirror, and resumable ingestion progress
//! - [`fetch`] -- the link-manifest and web-crawl document fetchers
//! - [`markdown`] / [`chunk`] -- cleanup and chunking of page content
//! - [`embed`] -- the embedding provider, batched streaming, and the query
//!   embedding cache
//! - [`ingest`] -- the source-to-store pipeline with hash-based skipping
//! - [`search`] -- the hybrid search service
//! - [`mcp`] -- the stdio tool-call transport

pub mod assist;
pub mod chunk;
pub mod config;
pub mod embed;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod markdown;
pub mod mcp;
pub mod search;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use store::Store;

//! Default values for configuration

/// Default embedding provider
pub fn default_embedding_provider() -> String {
    "openai".to_string()
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Default embedding dimension (text-embedding-3-small)
pub fn default_embedding_dimensions() -> usize {
    1536
}

/// Base URL for OpenAI-compatible endpoints
pub fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Default chat model used for source descriptions and answer synthesis
pub fn default_summary_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default batch size per embedding request
pub fn default_embed_batch_size() -> usize {
    100
}

/// Default number of embedding batches in flight
pub fn default_embed_concurrency() -> usize {
    5
}

/// Default maximum pages per crawl job
pub fn default_crawl_limit() -> u32 {
    100
}

/// Default query cache capacity
pub fn default_cache_max_size() -> usize {
    1000
}

/// Default query cache TTL in seconds (30 minutes)
pub fn default_cache_ttl_secs() -> u64 {
    1800
}

/// Default result limit for searches
pub fn default_search_limit() -> usize {
    5
}

/// Default character budget for a search response
pub fn default_max_total_chars() -> usize {
    50_000
}

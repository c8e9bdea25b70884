//! OpenAI-compatible embeddings backend

use super::EmbeddingProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Embeddings client for OpenAI-compatible `/embeddings` endpoints.
///
/// Transient failures (429, 5xx, transport errors) are retried up to three
/// attempts per batch with exponential backoff.
pub struct OpenAiProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl OpenAiProvider {
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(
            api_key,
            &config.openai_base_url,
            &config.embedding_model,
            config.embedding_dimensions,
        )
    }

    pub fn new(api_key: &str, base_url: &str, model: &str, dimensions: usize) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("OPENAI_API_KEY is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| Error::Config("Invalid OPENAI_API_KEY".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
        })
    }

    fn should_retry_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn should_retry_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request() || err.is_decode()
    }

    fn backoff(attempt: usize) -> Duration {
        Duration::from_millis(500 * (1 << attempt.min(4) as u32))
    }

    async fn request_once(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, RequestError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: Some(self.dimensions),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(RequestError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RequestError::Status(status, body));
        }

        let mut parsed: EmbeddingResponse =
            response.json().await.map_err(RequestError::Transport)?;
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != texts.len() {
            return Err(RequestError::Fatal(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

enum RequestError {
    Transport(reqwest::Error),
    Status(StatusCode, String),
    Fatal(String),
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0usize;
        loop {
            match self.request_once(texts).await {
                Ok(embeddings) => {
                    debug!(count = embeddings.len(), model = %self.model, "Embedded batch");
                    return Ok(embeddings);
                }
                Err(RequestError::Status(status, body)) => {
                    if Self::should_retry_status(status) && attempt + 1 < MAX_ATTEMPTS {
                        attempt += 1;
                        warn!(%status, attempt, "Embedding request failed, retrying");
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        continue;
                    }
                    return Err(Error::Embedding(format!(
                        "embeddings request failed ({}): {}",
                        status, body
                    )));
                }
                Err(RequestError::Transport(err)) => {
                    if Self::should_retry_error(&err) && attempt + 1 < MAX_ATTEMPTS {
                        attempt += 1;
                        warn!(error = %err, attempt, "Embedding transport error, retrying");
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
                Err(RequestError::Fatal(message)) => {
                    return Err(Error::Embedding(message));
                }
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_joined_without_double_slash() {
        let provider =
            OpenAiProvider::new("key", "https://api.openai.com/v1/", "text-embedding-3-small", 1536)
                .unwrap();
        assert_eq!(provider.endpoint, "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn empty_key_is_rejected() {
        let result = OpenAiProvider::new("  ", "https://api.openai.com/v1", "m", 8);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert!(OpenAiProvider::backoff(1) < OpenAiProvider::backoff(2));
        assert_eq!(OpenAiProvider::backoff(4), OpenAiProvider::backoff(9));
    }
}

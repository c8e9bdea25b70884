//! Description and answer synthesis collaborator
//!
//! Thin client over an OpenAI-compatible chat endpoint. Both calls degrade
//! to a sensible default string on any failure: a missing description or a
//! skipped synthesis must never fail an ingestion run or a query.

use crate::config::Config;
use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub struct AssistClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl AssistClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                config.openai_base_url.trim_end_matches('/')
            ),
            api_key: config.openai_api_key.clone(),
            model: config.summary_model.clone(),
        })
    }

    /// Derive a one-sentence source description from its document titles.
    /// Falls back to a generic description on any failure.
    pub async fn describe(&self, name: &str, url: &str, titles: &[String]) -> String {
        let sample: Vec<&str> = titles.iter().take(25).map(String::as_str).collect();
        let prompt = format!(
            "Write one sentence describing the documentation source '{}' at {} \
             based on these page titles: {}. Reply with the sentence only.",
            name,
            url,
            sample.join("; ")
        );

        match self.complete(prompt).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(source = %name, error = %err, "Description synthesis failed, using fallback");
                format!("Documentation for {}", name)
            }
        }
    }

    /// Answer a query from retrieved documents. Falls back to a fixed string
    /// on any failure.
    pub async fn synthesize(&self, query: &str, docs: &[String]) -> String {
        let context = docs.join("\n\n---\n\n");
        let prompt = format!(
            "Answer the question using only the documentation below.\n\n\
             Question: {}\n\nDocumentation:\n{}",
            query, context
        );

        match self.complete(prompt).await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "Answer synthesis failed, using fallback");
                "No answer available.".to_string()
            }
        }
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: 300,
        };

        let response: ChatResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::Other("chat response had no content".to_string()))
    }
}

//! Ollama embedder (`POST /api/embed`), e.g. `nomic-embed-text` at 768 dimensions

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::embedding::{into_embedding_error, validate_batch, Embedder, EmbeddingVector};
use crate::errors::{status_is_retryable, transport_error, AgentError, Result};
use crate::retry::RetryManager;

/// Local embedding through an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
    retry: RetryManager,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, dimensions: usize, timeout: Duration) -> Result<Self> {
        if dimensions == 0 {
            return Err(AgentError::config("embedding dimensions must be greater than 0"));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AgentError::HttpError)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
            timeout,
            retry: RetryManager::new(),
        })
    }

    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("ollama embed", self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::EmbeddingError {
                reason: format!("Ollama HTTP {}: {}", status, error_text),
                retryable: status_is_retryable(status),
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| transport_error("ollama embed", self.timeout, e))?;

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let raw = self
            .retry
            .execute_with_retry(|| self.send_once(texts))
            .await
            .map_err(into_embedding_error)?;

        validate_batch(&self.model, self.dimensions, texts.len(), raw)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

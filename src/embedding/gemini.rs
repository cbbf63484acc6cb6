//! Gemini embedder (`text-embedding-004`, 768 dimensions by default)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::embedding::{into_embedding_error, validate_batch, Embedder, EmbeddingVector};
use crate::errors::{status_is_retryable, transport_error, AgentError, Result};
use crate::model::gemini::DEFAULT_GEMINI_URL;
use crate::retry::RetryManager;

/// Gemini `batchEmbedContents` client
#[derive(Clone)]
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    dimensions: usize,
    timeout: Duration,
    retry: RetryManager,
}

impl std::fmt::Debug for GeminiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiEmbedder")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl GeminiEmbedder {
    pub fn new(model: &str, dimensions: usize, api_key: String, timeout: Duration) -> Result<Self> {
        if dimensions == 0 {
            return Err(AgentError::config("embedding dimensions must be greater than 0"));
        }
        if api_key.trim().is_empty() {
            return Err(AgentError::config("Gemini API key is empty"));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AgentError::HttpError)?;

        Ok(Self {
            client,
            base_url: DEFAULT_GEMINI_URL.to_string(),
            model: model.to_string(),
            api_key,
            dimensions,
            timeout,
            retry: RetryManager::new(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    fn build_body(&self, texts: &[String]) -> serde_json::Value {
        let requests: Vec<_> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [{ "text": text }] },
                    "outputDimensionality": self.dimensions,
                })
            })
            .collect();
        json!({ "requests": requests })
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/v1beta/models/{}:batchEmbedContents",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("gemini embed", self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::EmbeddingError {
                reason: format!("Gemini HTTP {}: {}", status, error_text),
                retryable: status_is_retryable(status),
            });
        }

        let parsed: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| transport_error("gemini embed", self.timeout, e))?;

        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
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

        let body = self.build_body(texts);
        let raw = self
            .retry
            .execute_with_retry(|| self.send_once(&body))
            .await
            .map_err(into_embedding_error)?;

        validate_batch(&self.model, self.dimensions, texts.len(), raw)
    }
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

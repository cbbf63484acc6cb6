//! Embedding clients
//!
//! An [`Embedder`] turns text into fixed-dimension vectors. The dimension is
//! fixed at construction and every provider response is checked against it,
//! so a misconfigured model surfaces as a configuration error instead of a
//! silently corrupted collection.

pub mod gemini;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, Result};

pub use gemini::GeminiEmbedder;
pub use ollama::OllamaEmbedder;

/// A vector plus the model that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub values: Vec<f32>,
    pub model: String,
}

impl EmbeddingVector {
    pub fn new(values: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            values,
            model: model.into(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Text embedding capability
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stamped on every vector
    fn model_id(&self) -> &str;

    /// Output dimension, fixed for the lifetime of the embedder
    fn dimensions(&self) -> usize;

    /// Embed texts, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| AgentError::EmbeddingError {
            reason: "provider returned no vector".to_string(),
            retryable: false,
        })
    }
}

/// Check a provider response against the request and the fixed dimension.
pub(crate) fn validate_batch(
    model: &str,
    dimensions: usize,
    requested: usize,
    raw: Vec<Vec<f32>>,
) -> Result<Vec<EmbeddingVector>> {
    if raw.len() != requested {
        return Err(AgentError::EmbeddingError {
            reason: format!("requested {} embeddings, received {}", requested, raw.len()),
            retryable: false,
        });
    }

    raw.into_iter()
        .map(|values| {
            if values.len() != dimensions {
                return Err(AgentError::ConfigError(format!(
                    "embedding model {} returned dimension {}, configured {}",
                    model,
                    values.len(),
                    dimensions
                )));
            }
            Ok(EmbeddingVector::new(values, model))
        })
        .collect()
}

/// Fold transport failures into the embedding error class once retries are spent
pub(crate) fn into_embedding_error(err: AgentError) -> AgentError {
    match err {
        AgentError::HttpError(e) => AgentError::EmbeddingError {
            reason: e.to_string(),
            retryable: false,
        },
        other => other,
    }
}

//! Error types for the BrainSpark knowledge and memory core
//!
//! One enum carries every failure class the core can raise. Callers branch on
//! [`AgentError::kind`] to decide whether to degrade, retry or abort.

use thiserror::Error;

/// Main error type for the knowledge, memory and runtime layers
#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing credentials, dimension mismatch, invalid settings. Never retried.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Loader, chunking or embedding failure while ingesting one document
    #[error("Ingest failed for document '{document}': {reason}")]
    IngestError { document: String, reason: String },

    /// Query-time embedding or collection failure
    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    /// Embedding provider failure after its own retry budget
    #[error("Embedding error: {reason}")]
    EmbeddingError { reason: String, retryable: bool },

    /// External tool call failure
    #[error("Tool '{tool}' failed: {reason}")]
    ToolError { tool: String, reason: String },

    /// Memory store persistence failure
    #[error("Memory error: {0}")]
    MemoryError(String),

    /// Session storage persistence failure
    #[error("Session error: {0}")]
    SessionError(String),

    /// Model provider failure
    #[error("Model error: {reason}")]
    ModelError { reason: String, retryable: bool },

    /// Timeout on an external call
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Turn state machine transition errors
    #[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors with context
    #[error("Agent error: {0}")]
    Generic(String),
}

/// Failure classes used for propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Ingest,
    Retrieval,
    Embedding,
    Tool,
    Memory,
    Session,
    Model,
    Timeout,
    Internal,
}

impl AgentError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigError(_) => ErrorKind::Config,
            Self::IngestError { .. } => ErrorKind::Ingest,
            Self::RetrievalError(_) => ErrorKind::Retrieval,
            Self::EmbeddingError { .. } => ErrorKind::Embedding,
            Self::ToolError { .. } => ErrorKind::Tool,
            Self::MemoryError(_) => ErrorKind::Memory,
            Self::SessionError(_) => ErrorKind::Session,
            Self::ModelError { .. } => ErrorKind::Model,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidTransition { .. }
            | Self::HttpError(_)
            | Self::SerializationError(_)
            | Self::IoError(_)
            | Self::Generic(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry can reasonably succeed.
    ///
    /// Timeouts and transient transport failures are retryable; configuration
    /// errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::EmbeddingError { retryable, .. } | Self::ModelError { retryable, .. } => {
                *retryable
            }
            Self::HttpError(e) => {
                e.is_timeout() || e.is_connect() || e.status().map_or(false, status_is_retryable)
            }
            _ => false,
        }
    }

    /// Whether this error must abort construction instead of degrading
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolError {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn ingest(document: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::IngestError {
            document: document.into(),
            reason: reason.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Map a transport failure from a provider call onto the error taxonomy.
///
/// Timeouts become [`AgentError::Timeout`]; everything else stays an HTTP
/// error and keeps its retry classification.
pub(crate) fn transport_error(
    operation: &str,
    limit: std::time::Duration,
    err: reqwest::Error,
) -> AgentError {
    if err.is_timeout() {
        AgentError::timeout(operation, limit)
    } else {
        AgentError::HttpError(err)
    }
}

/// Whether an HTTP status from a provider is worth retrying
pub(crate) fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Convert anyhow errors to AgentError
impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Generic(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = AgentError::ingest("lean_seo_3", "page unreadable");
        assert!(err.to_string().contains("lean_seo_3"));
        assert!(err.to_string().contains("page unreadable"));
    }

    #[test]
    fn test_timeout_is_retryable_config_is_not() {
        let timeout = AgentError::timeout("embed", Duration::from_millis(1500));
        assert!(timeout.is_retryable());
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(timeout.to_string().contains("1500ms"));

        let config = AgentError::config("dimension mismatch");
        assert!(!config.is_retryable());
        assert!(config.is_fatal_config());
        assert_eq!(config.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_provider_errors_carry_retry_marker() {
        let transient = AgentError::ModelError {
            reason: "HTTP 503".to_string(),
            retryable: true,
        };
        let permanent = AgentError::EmbeddingError {
            reason: "HTTP 400".to_string(),
            retryable: false,
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = AgentError::InvalidTransition {
            from: "Generating".to_string(),
            to: "Retrieving".to_string(),
            reason: "Cannot go backwards".to_string(),
        };
        assert!(err.to_string().contains("Generating"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}

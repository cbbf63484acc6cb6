//! Model clients
//!
//! Every chat provider sits behind [`ModelClient`], so the turn loop, the
//! agentic chunker and the relevance filter never know which one they talk to.

pub mod gemini;
pub mod ollama;
pub mod types;

use async_trait::async_trait;

use crate::errors::Result;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use types::{strip_code_fence, ChatMessage, Completion, CompletionRequest, Role, ToolCall};

/// Language model capability
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider model identifier
    fn model_id(&self) -> &str;

    /// Produce one completion. Implementations apply their own retry budget
    /// and request timeout.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

//! Tool adapters
//!
//! Every external capability an agent can call (file access, shell, web
//! pages, search engines, tabular data) implements [`ToolAdapter`]. The
//! runtime only ever talks to a [`Toolbelt`], so adding a tool never changes
//! the turn loop.

pub mod implementations;
pub mod registry;
pub mod security;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;

pub use implementations::{
    CsvDescribeTool, CsvReadRowsTool, FetchPageTool, ListDirTool, ReadFileTool, ShellTool,
    TavilySearchTool, WikipediaSearchTool, WriteFileTool,
};
pub use registry::Toolbelt;
pub use security::PathJail;
pub use types::{ToolContext, ToolSchema};

/// One invocable tool
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Declaration advertised to the model; its name is the dispatch key
    fn schema(&self) -> ToolSchema;

    /// Run the tool with model-provided arguments and return text for the
    /// model. Failures are `ToolError`s.
    async fn invoke(&self, args: &Value) -> Result<String>;
}

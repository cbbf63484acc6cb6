//! Tool schemas, execution context and argument helpers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AgentError, Result};

/// Tool declaration advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// Parameter schema (JSON Schema)
    pub parameters: Value,
    /// Whether the tool has no side effects
    #[serde(default)]
    pub read_only: bool,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Resource bounds shared by the built-in tools
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Jail root for filesystem tools and working directory for shell commands
    pub working_dir: PathBuf,
    /// Per-invocation timeout
    pub timeout: Duration,
    /// Maximum bytes returned to the model
    pub max_output_size: usize,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| "/tmp".into()),
            timeout: Duration::from_secs(60),
            max_output_size: 100 * 1024,
        }
    }
}

impl ToolContext {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_size(mut self, size: usize) -> Self {
        self.max_output_size = size;
        self
    }
}

/// Required string argument
pub fn required_str<'a>(tool: &str, args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::tool(tool, format!("missing string argument '{}'", key)))
}

pub fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

/// Cut `text` to at most `limit` bytes on a char boundary, marking the cut
pub fn truncate_output(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n\n... (output truncated)");
    text
}

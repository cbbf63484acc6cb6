//! Toolbelt: the ordered set of tools an agent may call

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{AgentError, Result};
use crate::retry::with_timeout;
use crate::tools::types::{truncate_output, ToolSchema};
use crate::tools::ToolAdapter;

/// Ordered tool registry with uniform dispatch
#[derive(Clone)]
pub struct Toolbelt {
    tools: Vec<(ToolSchema, Arc<dyn ToolAdapter>)>,
    timeout: Duration,
    max_output_size: usize,
}

impl Default for Toolbelt {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Toolbelt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbelt")
            .field("tools", &self.names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Toolbelt {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            timeout: Duration::from_secs(60),
            max_output_size: 100 * 1024,
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

    /// Add a tool; names must be unique
    pub fn register(&mut self, tool: Arc<dyn ToolAdapter>) -> Result<()> {
        let schema = tool.schema();
        if self.get(&schema.name).is_some() {
            return Err(AgentError::config(format!(
                "tool '{}' registered twice",
                schema.name
            )));
        }
        self.tools.push((schema, tool));
        Ok(())
    }

    pub fn with_tool(mut self, tool: Arc<dyn ToolAdapter>) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn ToolAdapter>> {
        self.tools
            .iter()
            .find(|(schema, _)| schema.name == name)
            .map(|(_, tool)| tool)
    }

    /// Schemas in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|(schema, _)| schema.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|(schema, _)| schema.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch by name under the toolbelt timeout.
    ///
    /// Unknown tools and tool failures are `ToolError`s; expiry is a
    /// retryable `Timeout`.
    pub async fn invoke(&self, name: &str, args: &Value) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::tool(name, "no such tool"))?;

        let operation = format!("tool {}", name);
        match with_timeout(&operation, self.timeout, tool.invoke(args)).await {
            Ok(output) => Ok(truncate_output(output, self.max_output_size)),
            Err(e @ AgentError::ToolError { .. }) | Err(e @ AgentError::Timeout { .. }) => Err(e),
            Err(e) => Err(AgentError::tool(name, e.to_string())),
        }
    }
}

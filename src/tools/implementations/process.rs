//! Shell command tool

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

use crate::errors::{AgentError, Result};
use crate::tools::types::{optional_u64, required_str, ToolContext, ToolSchema};
use crate::tools::ToolAdapter;

/// Run a command through `sh -c` in the working directory
#[derive(Debug, Clone)]
pub struct ShellTool {
    working_dir: PathBuf,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(context: &ToolContext) -> Self {
        Self {
            working_dir: context.working_dir.clone(),
            timeout: context.timeout,
        }
    }

    fn command(line: &str) -> Command {
        #[cfg(unix)]
        {
            let mut c = Command::new("sh");
            c.arg("-c").arg(line);
            c
        }
        #[cfg(windows)]
        {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(line);
            c
        }
    }
}

#[async_trait]
impl ToolAdapter for ShellTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "run_shell_command",
            "Run a shell command and return its output",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Command line to execute"
                    },
                    "timeout_seconds": {
                        "type": "integer",
                        "description": "Timeout in seconds"
                    }
                },
                "required": ["command"]
            }),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let line = required_str("run_shell_command", args, "command")?;
        if line.trim().is_empty() {
            return Err(AgentError::tool("run_shell_command", "command cannot be empty"));
        }
        let limit = optional_u64(args, "timeout_seconds")
            .map(Duration::from_secs)
            .map_or(self.timeout, |t| t.min(self.timeout));

        let mut cmd = Self::command(line);
        cmd.current_dir(&self.working_dir).kill_on_drop(true);

        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AgentError::tool(
                    "run_shell_command",
                    format!("failed to execute command: {}", e),
                ))
            }
            Err(_) => return Err(AgentError::timeout("run_shell_command", limit)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("STDOUT:\n{}\n\nSTDERR:\n{}", stdout, stderr)
        };

        match output.status.code() {
            Some(0) => Ok(combined),
            code => Err(AgentError::tool(
                "run_shell_command",
                format!("exited with code {}: {}", code.unwrap_or(-1), combined.trim()),
            )),
        }
    }
}

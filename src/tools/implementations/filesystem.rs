//! Jailed file tools: read_file, write_file, list_dir

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use crate::errors::{AgentError, Result};
use crate::tools::security::PathJail;
use crate::tools::types::{optional_bool, required_str, ToolContext, ToolSchema};
use crate::tools::ToolAdapter;

/// Read a text file inside the working directory
#[derive(Debug, Clone)]
pub struct ReadFileTool {
    jail: PathJail,
    max_size: usize,
}

impl ReadFileTool {
    pub fn new(context: &ToolContext) -> Result<Self> {
        Ok(Self {
            jail: PathJail::new(&context.working_dir)?,
            max_size: context.max_output_size,
        })
    }
}

#[async_trait]
impl ToolAdapter for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "read_file",
            "Read the contents of a text file",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the working directory"
                    }
                },
                "required": ["path"]
            }),
        )
        .read_only()
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let path = required_str("read_file", args, "path")?;
        let resolved = self.jail.resolve("read_file", path)?;

        if !resolved.is_file() {
            return Err(AgentError::tool("read_file", format!("not a file: {}", path)));
        }

        let metadata = fs::metadata(&resolved)
            .map_err(|e| AgentError::tool("read_file", format!("{}: {}", path, e)))?;
        if metadata.len() > self.max_size as u64 {
            return Err(AgentError::tool(
                "read_file",
                format!(
                    "file too large: {} bytes (max: {} bytes)",
                    metadata.len(),
                    self.max_size
                ),
            ));
        }

        fs::read_to_string(&resolved)
            .map_err(|e| AgentError::tool("read_file", format!("{}: {}", path, e)))
    }
}

/// Write or append a text file inside the working directory
#[derive(Debug, Clone)]
pub struct WriteFileTool {
    jail: PathJail,
    max_size: usize,
}

impl WriteFileTool {
    pub fn new(context: &ToolContext) -> Result<Self> {
        Ok(Self {
            jail: PathJail::new(&context.working_dir)?,
            max_size: context.max_output_size,
        })
    }
}

#[async_trait]
impl ToolAdapter for WriteFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "write_file",
            "Write content to a file, creating parent directories as needed",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "File path relative to the working directory"
                    },
                    "content": {
                        "type": "string",
                        "description": "Text to write"
                    },
                    "append": {
                        "type": "boolean",
                        "description": "Append instead of overwriting",
                        "default": false
                    }
                },
                "required": ["path", "content"]
            }),
        )
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let path = required_str("write_file", args, "path")?;
        let content = required_str("write_file", args, "content")?;
        let append = optional_bool(args, "append").unwrap_or(false);

        if content.len() > self.max_size {
            return Err(AgentError::tool(
                "write_file",
                format!(
                    "content too large: {} bytes (max: {} bytes)",
                    content.len(),
                    self.max_size
                ),
            ));
        }

        let resolved = self.jail.resolve("write_file", path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AgentError::tool("write_file", format!("{}: {}", path, e)))?;
        }

        let result = if append {
            use std::io::Write;
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .and_then(|mut f| f.write_all(content.as_bytes()))
        } else {
            fs::write(&resolved, content)
        };
        result.map_err(|e| AgentError::tool("write_file", format!("{}: {}", path, e)))?;

        let action = if append { "appended" } else { "wrote" };
        Ok(format!("Successfully {} {} bytes to {}", action, content.len(), path))
    }
}

/// List a directory inside the working directory
#[derive(Debug, Clone)]
pub struct ListDirTool {
    jail: PathJail,
}

impl ListDirTool {
    pub fn new(context: &ToolContext) -> Result<Self> {
        Ok(Self {
            jail: PathJail::new(&context.working_dir)?,
        })
    }
}

#[async_trait]
impl ToolAdapter for ListDirTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "list_dir",
            "List contents of a directory",
            json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory path relative to the working directory"
                    },
                    "recursive": {
                        "type": "boolean",
                        "description": "Whether to list recursively",
                        "default": false
                    }
                },
                "required": ["path"]
            }),
        )
        .read_only()
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let path = required_str("list_dir", args, "path")?;
        let recursive = optional_bool(args, "recursive").unwrap_or(false);
        let resolved = self.jail.resolve("list_dir", path)?;

        if !resolved.is_dir() {
            return Err(AgentError::tool("list_dir", format!("not a directory: {}", path)));
        }

        let mut entries = Vec::new();
        list_into(&resolved, &resolved, recursive, &mut entries)
            .map_err(|e| AgentError::tool("list_dir", format!("{}: {}", path, e)))?;
        entries.sort();
        Ok(entries.join("\n"))
    }
}

fn list_into(
    base: &Path,
    current: &Path,
    recursive: bool,
    entries: &mut Vec<String>,
) -> std::io::Result<()> {
    for entry in fs::read_dir(current)? {
        let path = entry?.path();
        let relative = path.strip_prefix(base).unwrap_or(&path);
        let name = relative.to_string_lossy();

        if path.is_dir() {
            entries.push(format!("DIR  {}/", name));
            if recursive {
                list_into(base, &path, recursive, entries)?;
            }
        } else {
            entries.push(format!("FILE {}", name));
        }
    }
    Ok(())
}

//! CSV inspection tools for spreadsheets dropped into the working directory

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::errors::{AgentError, Result};
use crate::tools::security::PathJail;
use crate::tools::types::{optional_u64, required_str, truncate_output, ToolContext, ToolSchema};
use crate::tools::ToolAdapter;

const DEFAULT_ROW_LIMIT: u64 = 50;
const MAX_ROW_LIMIT: u64 = 500;

fn open_csv(tool: &str, path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| AgentError::tool(tool, format!("{}: {}", path.display(), e)))
}

fn resolve_file(jail: &PathJail, tool: &str, path: &str) -> Result<PathBuf> {
    let resolved = jail.resolve(tool, path)?;
    if !resolved.is_file() {
        return Err(AgentError::tool(tool, format!("not a file: {}", path)));
    }
    Ok(resolved)
}

/// Report the columns and row count of a CSV file
#[derive(Debug, Clone)]
pub struct CsvDescribeTool {
    jail: PathJail,
}

impl CsvDescribeTool {
    pub fn new(context: &ToolContext) -> Result<Self> {
        Ok(Self {
            jail: PathJail::new(&context.working_dir)?,
        })
    }
}

#[async_trait]
impl ToolAdapter for CsvDescribeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "csv_describe",
            "Describe a CSV file: column names and number of rows",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "CSV file path" }
                },
                "required": ["path"]
            }),
        )
        .read_only()
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let path = required_str("csv_describe", args, "path")?;
        let resolved = resolve_file(&self.jail, "csv_describe", path)?;

        let mut reader = open_csv("csv_describe", &resolved)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AgentError::tool("csv_describe", e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = 0usize;
        for record in reader.records() {
            record.map_err(|e| AgentError::tool("csv_describe", e.to_string()))?;
            rows += 1;
        }

        Ok(format!(
            "{}\ncolumns ({}): {}\nrows: {}",
            path,
            headers.len(),
            headers.join(", "),
            rows
        ))
    }
}

/// Read a window of rows from a CSV file as JSON objects
#[derive(Debug, Clone)]
pub struct CsvReadRowsTool {
    jail: PathJail,
    max_output_size: usize,
}

impl CsvReadRowsTool {
    pub fn new(context: &ToolContext) -> Result<Self> {
        Ok(Self {
            jail: PathJail::new(&context.working_dir)?,
            max_output_size: context.max_output_size,
        })
    }
}

#[async_trait]
impl ToolAdapter for CsvReadRowsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "csv_read_rows",
            "Read rows from a CSV file, one JSON object per line",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "CSV file path" },
                    "offset": {
                        "type": "integer",
                        "description": "Zero-based index of the first data row",
                        "default": 0
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum rows to return",
                        "default": DEFAULT_ROW_LIMIT
                    }
                },
                "required": ["path"]
            }),
        )
        .read_only()
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let path = required_str("csv_read_rows", args, "path")?;
        let offset = optional_u64(args, "offset").unwrap_or(0) as usize;
        let limit = optional_u64(args, "limit")
            .unwrap_or(DEFAULT_ROW_LIMIT)
            .clamp(1, MAX_ROW_LIMIT) as usize;
        let resolved = resolve_file(&self.jail, "csv_read_rows", path)?;

        let mut reader = open_csv("csv_read_rows", &resolved)?;
        let headers = reader
            .headers()
            .map_err(|e| AgentError::tool("csv_read_rows", e.to_string()))?
            .clone();

        let mut lines = Vec::new();
        for record in reader.records().skip(offset).take(limit) {
            let record = record.map_err(|e| AgentError::tool("csv_read_rows", e.to_string()))?;
            let row: serde_json::Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
                .collect();
            lines.push(Value::Object(row).to_string());
        }

        if lines.is_empty() {
            return Ok(format!("No rows at offset {} in {}", offset, path));
        }
        Ok(truncate_output(lines.join("\n"), self.max_output_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ToolContext) {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("keywords.csv"),
            "keyword,volume\nlean seo,1200\nlocal seo,900\nppc audit,300\n",
        )
        .unwrap();
        let context = ToolContext::new(temp.path().to_path_buf());
        (temp, context)
    }

    #[tokio::test]
    async fn test_describe() {
        let (_temp, context) = setup();
        let out = CsvDescribeTool::new(&context)
            .unwrap()
            .invoke(&json!({"path": "keywords.csv"}))
            .await
            .unwrap();
        assert!(out.contains("columns (2): keyword, volume"));
        assert!(out.contains("rows: 3"));
    }

    #[tokio::test]
    async fn test_read_rows_window() {
        let (_temp, context) = setup();
        let out = CsvReadRowsTool::new(&context)
            .unwrap()
            .invoke(&json!({"path": "keywords.csv", "offset": 1, "limit": 1}))
            .await
            .unwrap();
        let row: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(row, json!({"keyword": "local seo", "volume": "900"}));
    }

    #[tokio::test]
    async fn test_read_rows_past_end() {
        let (_temp, context) = setup();
        let out = CsvReadRowsTool::new(&context)
            .unwrap()
            .invoke(&json!({"path": "keywords.csv", "offset": 10}))
            .await
            .unwrap();
        assert!(out.starts_with("No rows"));
    }

    #[tokio::test]
    async fn test_missing_file_is_tool_error() {
        let (_temp, context) = setup();
        let err = CsvDescribeTool::new(&context)
            .unwrap()
            .invoke(&json!({"path": "nope.csv"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolError { .. }));
    }
}

//! read_file tool - Read file contents with line numbers

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::schema::{require_str, u64_param};
use super::{ParamKind, Tool, ToolContext, ToolError, ToolSchema};

/// Longest line shown before truncation
const MAX_LINE_LEN: usize = 2000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file's contents with line numbers. Required before editing."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("path", ParamKind::String, "File path relative to the working directory")
            .optional("offset", ParamKind::Integer, "Line number to start reading from (1-indexed)")
            .optional("limit", ParamKind::Integer, "Max lines to read (default: 2000)")
    }

    async fn execute(&self, params: &Map<String, Value>, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = require_str(self.name(), params, "path")?;
        let offset = u64_param(params, "offset").unwrap_or(1).max(1) as usize;
        let limit = u64_param(params, "limit").unwrap_or(2000) as usize;

        let full_path = ctx.validate_path(Path::new(path))?;
        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::io("read", path, e))?;

        ctx.track_read(&full_path).await;

        let lines: Vec<String> = content
            .lines()
            .skip(offset - 1)
            .take(limit)
            .enumerate()
            .map(|(i, line)| {
                let shown = if line.chars().count() > MAX_LINE_LEN {
                    let cut: String = line.chars().take(MAX_LINE_LEN).collect();
                    format!("{}...", cut)
                } else {
                    line.to_string()
                };
                format!("{:>6}|{}", offset + i, shown)
            })
            .collect();

        Ok(lines.join("\n"))
    }
}

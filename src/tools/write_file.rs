//! write_file tool - Write content to a file

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::schema::require_str;
use super::{ParamKind, Tool, ToolContext, ToolError, ToolSchema};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file. Creates parent directories if needed."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("path", ParamKind::String, "File path relative to the working directory")
            .required("content", ParamKind::String, "Content to write")
            .modifies("path")
    }

    async fn execute(&self, params: &Map<String, Value>, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = require_str(self.name(), params, "path")?;
        let content = require_str(self.name(), params, "content")?;

        let full_path = ctx.validate_path(Path::new(path))?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::io("create directory for", path, e))?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| ToolError::io("write", path, e))?;

        // A file we wrote is known content, so it may be edited next
        ctx.track_read(&full_path).await;

        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }
}

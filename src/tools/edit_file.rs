//! edit_file tool - Replace a specific string in a file

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::schema::{bool_param, require_str};
use super::{ParamKind, Tool, ToolContext, ToolError, ToolSchema};

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Replace a specific string in a file. Requires prior read_file call."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("path", ParamKind::String, "File path relative to the working directory")
            .required("old_string", ParamKind::String, "Exact string to find and replace")
            .required("new_string", ParamKind::String, "Replacement string")
            .optional("replace_all", ParamKind::Boolean, "Replace all occurrences (default: false)")
            .modifies("path")
    }

    async fn execute(&self, params: &Map<String, Value>, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = require_str(self.name(), params, "path")?;
        let old_string = require_str(self.name(), params, "old_string")?;
        let new_string = require_str(self.name(), params, "new_string")?;
        let replace_all = bool_param(params, "replace_all").unwrap_or(false);

        if old_string.is_empty() {
            return Err(ToolError::Failed("old_string cannot be empty".to_string()));
        }

        let full_path = ctx.validate_path(Path::new(path))?;
        if !ctx.was_read(&full_path).await {
            return Err(ToolError::EditWithoutRead {
                path: path.to_string(),
            });
        }

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::io("read", path, e))?;

        let count = content.matches(old_string).count();
        if count == 0 {
            return Err(ToolError::Failed(
                "old_string not found in file. Make sure it matches exactly including whitespace.".to_string(),
            ));
        }
        if count > 1 && !replace_all {
            return Err(ToolError::Failed(format!(
                "old_string found {} times. Use replace_all=true or provide more context.",
                count
            )));
        }

        let updated = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };
        tokio::fs::write(&full_path, &updated)
            .await
            .map_err(|e| ToolError::io("write", path, e))?;

        let replaced = if replace_all { count } else { 1 };
        Ok(format!("Replaced {} occurrence(s) in {}", replaced, path))
    }
}

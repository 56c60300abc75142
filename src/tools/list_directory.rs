//! list_directory tool - List files and directories in a path

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::schema::str_param;
use super::{ParamKind, Tool, ToolContext, ToolError, ToolSchema};

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List files and directories in a path."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().optional(
            "path",
            ParamKind::String,
            "Directory path relative to the working directory (default: .)",
        )
    }

    async fn execute(&self, params: &Map<String, Value>, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = str_param(params, "path").unwrap_or(".");
        let full_path = ctx.validate_path(Path::new(path))?;

        let mut dir = tokio::fs::read_dir(&full_path)
            .await
            .map_err(|e| ToolError::io("list", path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| ToolError::io("list", path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();

        if entries.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_list_directory_basic() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        std::fs::write(dir.path().join("file1.txt"), "content").unwrap();
        std::fs::write(dir.path().join("file2.txt"), "content").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let listing = ListDirectoryTool.execute(&params(json!({"path": "."})), &ctx).await.unwrap();
        assert_eq!(listing, "file1.txt\nfile2.txt\nsubdir/");
    }

    #[tokio::test]
    async fn test_list_directory_default_path() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        std::fs::write(dir.path().join("test.txt"), "content").unwrap();

        let listing = ListDirectoryTool.execute(&Map::new(), &ctx).await.unwrap();
        assert!(listing.contains("test.txt"));
    }

    #[tokio::test]
    async fn test_list_directory_empty() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let listing = ListDirectoryTool.execute(&Map::new(), &ctx).await.unwrap();
        assert_eq!(listing, "(empty directory)");
    }

    #[tokio::test]
    async fn test_list_directory_missing() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let err = ListDirectoryTool
            .execute(&params(json!({"path": "nope"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "path does not exist: nope");
    }
}

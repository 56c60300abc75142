//! Tool system
//!
//! The backend asks for tools by name with a JSON parameter map. A
//! `ToolExecutor` runs them; `ToolRegistry` is the built-in executor, holding
//! tools scoped to the loop's working directory.

mod context;
mod edit_file;
mod list_directory;
mod read_file;
mod registry;
pub mod schema;
mod write_file;

pub use context::{ToolContext, ToolError};
pub use registry::ToolRegistry;
pub use schema::{ParamKind, ParamSpec, ToolSchema};

pub use edit_file::EditFileTool;
pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use write_file::WriteFileTool;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool invocation requested by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        schema::str_param(&self.parameters, key)
    }

    /// One-line description, e.g. `"→ read_file path=a.txt"`
    pub fn info(&self, prefix: &str) -> String {
        if self.parameters.is_empty() {
            return format!("{} {}", prefix, self.name);
        }
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, truncate(s, 60)),
                other => format!("{}={}", k, other),
            })
            .collect();
        format!("{} {} {}", prefix, self.name, params.join(", "))
    }
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    if first_line.chars().count() > max || first_line.len() < s.len() {
        let cut: String = first_line.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        first_line.to_string()
    }
}

/// Successful tool outcome
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    /// Files the call modified
    pub changed_files: Vec<PathBuf>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            changed_files: Vec::new(),
        }
    }
}

/// Runs tool calls on behalf of the loop.
///
/// Implementations must return in bounded time; a blocked call blocks the
/// iteration that issued it.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError>;

    /// Files a call would modify, for calls the backend ran itself
    fn touched_paths(&self, _call: &ToolCall) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// A single tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches `ToolCall::name`)
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn schema(&self) -> ToolSchema;

    /// Run the tool. Parameters have already been checked against `schema()`.
    async fn execute(&self, params: &Map<String, Value>, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Tool definition advertised to a backend
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

//! Tool registry - schema-checked registration and dispatch

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};

use super::{
    EditFileTool, ListDirectoryTool, ReadFileTool, Tool, ToolCall, ToolContext, ToolDefinition, ToolError,
    ToolExecutor, ToolOutput, ToolSchema, WriteFileTool,
};

struct Registered {
    tool: Box<dyn Tool>,
    schema: ToolSchema,
}

/// Manages the tools available to a loop
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
    ctx: ToolContext,
}

impl ToolRegistry {
    /// Empty registry (for custom tool sets)
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            tools: HashMap::new(),
            ctx,
        }
    }

    /// Registry with the built-in file tools rooted at `working_dir`
    pub fn standard(working_dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new(ToolContext::new(working_dir));
        let builtins: Vec<Box<dyn Tool>> = vec![
            Box::new(ReadFileTool),
            Box::new(WriteFileTool),
            Box::new(EditFileTool),
            Box::new(ListDirectoryTool),
        ];
        for tool in builtins {
            if let Err(e) = registry.register(tool) {
                warn!("Skipping built-in tool: {}", e);
            }
        }
        registry
    }

    /// Add a tool, checking its declared schema
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name();
        if self.tools.contains_key(name) {
            return Err(ToolError::DuplicateTool(name.to_string()));
        }
        let schema = tool.schema();
        schema.check(name)?;
        debug!("Registered tool {}", name);
        self.tools.insert(name.to_string(), Registered { tool, schema });
        Ok(())
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Sorted tool names
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Changed file of a call, relative to the root where possible so that
    /// `./a.txt`, `a.txt` and `<root>/a.txt` count as one file
    fn changed_path(&self, schema: &ToolSchema, call: &ToolCall) -> Option<PathBuf> {
        let path = schema.changed_path(&call.parameters)?;
        let root = self.ctx.root();
        let relative = if path.is_absolute() {
            let canonical_root = root.canonicalize().ok();
            path.strip_prefix(root)
                .ok()
                .or_else(|| canonical_root.as_deref().and_then(|r| path.strip_prefix(r).ok()))
                .map(Path::to_path_buf)
                .unwrap_or_else(|| path.clone())
        } else {
            path
        };
        Some(
            relative
                .components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect(),
        )
    }

    /// Definitions for every registered tool, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|r| ToolDefinition {
                name: r.tool.name().to_string(),
                description: r.tool.description().to_string(),
                input_schema: r.schema.to_json(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let entry = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        entry.schema.validate_call(&call.name, &call.parameters)?;
        let content = entry.tool.execute(&call.parameters, &self.ctx).await?;

        Ok(ToolOutput {
            content,
            changed_files: self.changed_path(&entry.schema, call).into_iter().collect(),
        })
    }

    fn touched_paths(&self, call: &ToolCall) -> Vec<PathBuf> {
        self.tools
            .get(&call.name)
            .and_then(|r| self.changed_path(&r.schema, call))
            .into_iter()
            .collect()
    }
}

//! Tool execution context - scoped to a loop's working directory

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

/// Execution context shared by every tool of one registry
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// All file operations are constrained here
    root: PathBuf,

    /// Files read so far (edit_file requires a prior read)
    read_files: Arc<Mutex<HashSet<PathBuf>>>,

    /// Whether sandbox mode is enabled (default: true)
    pub sandbox_enabled: bool,
}

impl ToolContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_files: Arc::new(Mutex::new(HashSet::new())),
            sandbox_enabled: true,
        }
    }

    /// Context without path confinement
    pub fn unsandboxed(root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_enabled: false,
            ..Self::new(root)
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Track that a file was read
    pub async fn track_read(&self, path: &Path) {
        self.read_files.lock().await.insert(self.resolve(path));
    }

    pub async fn was_read(&self, path: &Path) -> bool {
        self.read_files.lock().await.contains(&self.resolve(path))
    }

    pub async fn clear_reads(&self) {
        self.read_files.lock().await.clear();
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Resolve `path` against the root, rejecting anything that escapes it
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        let resolved = canonicalize_existing(&self.resolve(path));

        if !self.sandbox_enabled {
            return Ok(resolved);
        }

        let violation = || ToolError::SandboxViolation {
            path: path.to_path_buf(),
            root: self.root.clone(),
        };

        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(violation());
        }

        let root = self.root.canonicalize().map_err(|e| ToolError::Io {
            operation: "canonicalize working directory".to_string(),
            source: e,
        })?;

        if resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(violation())
        }
    }
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
/// New files cannot be canonicalized yet, but their parents can.
fn canonicalize_existing(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Errors that can occur while registering or running tools
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid schema for {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("Invalid parameters for {tool}: {reason}")]
    InvalidParams { tool: String, reason: String },

    #[error("Path {path} escapes working directory {root}")]
    SandboxViolation { path: PathBuf, root: PathBuf },

    #[error("path does not exist: {path}")]
    NotFound { path: String },

    #[error("Must read file before editing: {path}")]
    EditWithoutRead { path: String },

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    /// Map an IO error on `path`, turning NotFound into the dedicated variant
    pub fn io(operation: &str, path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotFound {
                path: path.to_string(),
            }
        } else {
            ToolError::Io {
                operation: format!("{} {}", operation, path),
                source,
            }
        }
    }
}

//! Loop state machine values

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RalphError;

/// Lifecycle of a loop: Idle -> Running -> one terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    Complete,
    Failed,
    Cancelled,
    TimedOut,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Complete | LoopState::Failed | LoopState::Cancelled | LoopState::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Running => "running",
            LoopState::Complete => "complete",
            LoopState::Failed => "failed",
            LoopState::Cancelled => "cancelled",
            LoopState::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal summary of one run, produced exactly once
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub state: LoopState,
    pub iterations: u32,
    pub duration: Duration,
    pub error: Option<Arc<RalphError>>,
    /// Sorted, distinct
    pub files_changed: Vec<PathBuf>,
}

impl LoopResult {
    pub fn is_success(&self) -> bool {
        self.state == LoopState::Complete
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

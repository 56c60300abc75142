//! Loop engine and its state types.

mod files;
mod loop_engine;
mod prompt;
mod state;

pub use files::FileChangeSet;
pub use loop_engine::LoopEngine;
pub use prompt::build_iteration_prompt;
pub use state::{LoopResult, LoopState};

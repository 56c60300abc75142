//! Ralph - an iterative AI coding loop
//!
//! Ralph sends the same task prompt to an AI backend over and over, letting
//! the assistant use file tools, until its reply contains a completion
//! promise or a budget (iterations, time) runs out.

pub mod backend;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod tools;

pub use completion::{CompletionDetector, DetectionStrategy, detect_promise};
pub use config::{Config, LoopConfig};
pub use engine::{LoopEngine, LoopResult, LoopState};
pub use error::{RalphError, Result};
pub use events::{Event, EventStream};
pub use session::{RetryPolicy, RetryingSessionClient};
pub use tools::{ToolExecutor, ToolRegistry};

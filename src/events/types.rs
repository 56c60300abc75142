//! Loop events - one variant per kind of progress notification.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::engine::LoopResult;
use crate::tools::ToolCall;

/// Event type names, stable for logs and display
pub mod event_types {
    pub const LOOP_STARTED: &str = "loop.started";
    pub const ITERATION_STARTED: &str = "iteration.started";
    pub const TEXT_CHUNK: &str = "text.chunk";
    pub const TOOL_CALL_STARTED: &str = "tool.started";
    pub const TOOL_CALL_RESULT: &str = "tool.result";
    pub const ITERATION_COMPLETE: &str = "iteration.complete";
    pub const COMPLETION_DETECTED: &str = "completion.detected";
    pub const LOOP_COMPLETE: &str = "loop.complete";
    pub const LOOP_CANCELLED: &str = "loop.cancelled";
    pub const ERROR: &str = "error";
}

/// A progress notification emitted by a running loop
#[derive(Debug, Clone)]
pub enum Event {
    LoopStarted {
        at: DateTime<Utc>,
        session_id: String,
        model: String,
        max_iterations: u32,
    },
    IterationStarted {
        at: DateTime<Utc>,
        iteration: u32,
        max_iterations: u32,
    },
    TextChunk {
        at: DateTime<Utc>,
        iteration: u32,
        text: String,
    },
    ToolCallStarted {
        at: DateTime<Utc>,
        iteration: u32,
        call: ToolCall,
    },
    /// `output` holds the tool's text or its error message
    ToolCallResult {
        at: DateTime<Utc>,
        iteration: u32,
        call: ToolCall,
        output: Result<String, String>,
    },
    IterationCompleted {
        at: DateTime<Utc>,
        iteration: u32,
        duration: Duration,
    },
    CompletionDetected {
        at: DateTime<Utc>,
        iteration: u32,
        phrase: String,
    },
    LoopCompleted {
        at: DateTime<Utc>,
        result: LoopResult,
    },
    LoopCancelled {
        at: DateTime<Utc>,
        iteration: u32,
    },
    Error {
        at: DateTime<Utc>,
        iteration: u32,
        message: String,
    },
}

impl Event {
    pub fn loop_started(session_id: &str, model: &str, max_iterations: u32) -> Self {
        Event::LoopStarted {
            at: Utc::now(),
            session_id: session_id.to_string(),
            model: model.to_string(),
            max_iterations,
        }
    }

    pub fn iteration_started(iteration: u32, max_iterations: u32) -> Self {
        Event::IterationStarted {
            at: Utc::now(),
            iteration,
            max_iterations,
        }
    }

    pub fn text_chunk(iteration: u32, text: impl Into<String>) -> Self {
        Event::TextChunk {
            at: Utc::now(),
            iteration,
            text: text.into(),
        }
    }

    pub fn tool_call_started(iteration: u32, call: ToolCall) -> Self {
        Event::ToolCallStarted {
            at: Utc::now(),
            iteration,
            call,
        }
    }

    pub fn tool_call_result(iteration: u32, call: ToolCall, output: Result<String, String>) -> Self {
        Event::ToolCallResult {
            at: Utc::now(),
            iteration,
            call,
            output,
        }
    }

    pub fn iteration_completed(iteration: u32, duration: Duration) -> Self {
        Event::IterationCompleted {
            at: Utc::now(),
            iteration,
            duration,
        }
    }

    pub fn completion_detected(iteration: u32, phrase: &str) -> Self {
        Event::CompletionDetected {
            at: Utc::now(),
            iteration,
            phrase: phrase.to_string(),
        }
    }

    pub fn loop_completed(result: LoopResult) -> Self {
        Event::LoopCompleted { at: Utc::now(), result }
    }

    pub fn loop_cancelled(iteration: u32) -> Self {
        Event::LoopCancelled {
            at: Utc::now(),
            iteration,
        }
    }

    pub fn error(iteration: u32, message: impl Into<String>) -> Self {
        Event::Error {
            at: Utc::now(),
            iteration,
            message: message.into(),
        }
    }

    /// When the event was produced
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::LoopStarted { at, .. }
            | Event::IterationStarted { at, .. }
            | Event::TextChunk { at, .. }
            | Event::ToolCallStarted { at, .. }
            | Event::ToolCallResult { at, .. }
            | Event::IterationCompleted { at, .. }
            | Event::CompletionDetected { at, .. }
            | Event::LoopCompleted { at, .. }
            | Event::LoopCancelled { at, .. }
            | Event::Error { at, .. } => *at,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::LoopStarted { .. } => event_types::LOOP_STARTED,
            Event::IterationStarted { .. } => event_types::ITERATION_STARTED,
            Event::TextChunk { .. } => event_types::TEXT_CHUNK,
            Event::ToolCallStarted { .. } => event_types::TOOL_CALL_STARTED,
            Event::ToolCallResult { .. } => event_types::TOOL_CALL_RESULT,
            Event::IterationCompleted { .. } => event_types::ITERATION_COMPLETE,
            Event::CompletionDetected { .. } => event_types::COMPLETION_DETECTED,
            Event::LoopCompleted { .. } => event_types::LOOP_COMPLETE,
            Event::LoopCancelled { .. } => event_types::LOOP_CANCELLED,
            Event::Error { .. } => event_types::ERROR,
        }
    }

    /// Iteration the event belongs to, if any
    pub fn iteration(&self) -> Option<u32> {
        match self {
            Event::IterationStarted { iteration, .. }
            | Event::TextChunk { iteration, .. }
            | Event::ToolCallStarted { iteration, .. }
            | Event::ToolCallResult { iteration, .. }
            | Event::IterationCompleted { iteration, .. }
            | Event::CompletionDetected { iteration, .. }
            | Event::LoopCancelled { iteration, .. }
            | Event::Error { iteration, .. } => Some(*iteration),
            Event::LoopCompleted { result, .. } => Some(result.iterations),
            Event::LoopStarted { .. } => None,
        }
    }

    /// Whether this is the last event a run emits
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::LoopCompleted { .. } | Event::LoopCancelled { .. })
    }
}

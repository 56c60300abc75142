//! Backend transport - the conversational AI service a loop talks to.
//!
//! A backend owns sessions identified by opaque handles and answers each
//! prompt with an ordered stream of `BackendEvent`s that ends with either
//! `ResponseComplete` or `Error`.

pub mod process;
pub mod scripted;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SystemMessage;
use crate::error::Result;
use crate::tools::ToolCall;

pub use process::ProcessBackend;
pub use scripted::{ScriptedBackend, ScriptedResponse};

/// Per-session settings handed to the backend
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub model: String,
    pub working_dir: PathBuf,
    pub system_message: Option<SystemMessage>,
}

/// One item of a backend response stream (one JSON object per line on the wire)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    Text {
        text: String,
    },
    /// The backend asks the client to run a tool
    ToolCall(ToolCall),
    /// The backend ran a tool itself and reports the outcome
    ToolResult {
        call: ToolCall,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
    ResponseComplete {
        #[serde(default)]
        content: String,
    },
    Error {
        message: String,
    },
}

impl BackendEvent {
    pub fn text(text: impl Into<String>) -> Self {
        BackendEvent::Text { text: text.into() }
    }

    pub fn complete() -> Self {
        BackendEvent::ResponseComplete {
            content: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        BackendEvent::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends a response stream
    pub fn is_final(&self) -> bool {
        matches!(self, BackendEvent::ResponseComplete { .. } | BackendEvent::Error { .. })
    }
}

/// Transport to a conversational backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Model identifier this backend talks to
    fn model(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Open a backend-side session, returning its handle
    async fn create_session(&self, options: &SessionOptions) -> Result<String>;

    async fn destroy_session(&self, handle: &str) -> Result<()>;

    /// Send a prompt. Errors returned here are failures to dispatch; failures
    /// mid-response arrive as `BackendEvent::Error` or a stream that closes
    /// without `ResponseComplete`.
    async fn send(
        &self,
        handle: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<BackendEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_event_wire_format() {
        let json = serde_json::to_string(&BackendEvent::text("hello")).unwrap();
        assert_eq!(json, r#"{"type":"text","text":"hello"}"#);

        let parsed: BackendEvent = serde_json::from_str(r#"{"type":"response_complete"}"#).unwrap();
        assert_eq!(parsed, BackendEvent::complete());
    }

    #[test]
    fn test_tool_call_event_is_flat() {
        let line = r#"{"type":"tool_call","id":"t1","name":"read_file","parameters":{"path":"a.txt"}}"#;
        let parsed: BackendEvent = serde_json::from_str(line).unwrap();
        match parsed {
            BackendEvent::ToolCall(call) => {
                assert_eq!(call.id, "t1");
                assert_eq!(call.name, "read_file");
                assert_eq!(call.param_str("path"), Some("a.txt"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_is_final() {
        assert!(BackendEvent::complete().is_final());
        assert!(BackendEvent::error("boom").is_final());
        assert!(!BackendEvent::text("x").is_final());
    }
}

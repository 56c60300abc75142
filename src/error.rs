//! Error types for Ralph
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use crate::session::is_retryable_message;
use crate::tools::ToolError;

/// All error types that can occur in Ralph
#[derive(Debug, Error)]
pub enum RalphError {
    /// Invalid loop configuration, detected before any session exists
    #[error("Config error: {0}")]
    Config(String),

    /// Session creation or destruction failure
    #[error("Session error: {0}")]
    Session(String),

    /// Failure talking to the backend
    #[error("Transport error: {message}")]
    Transport { message: String, retryable: bool },

    /// A retryable transport failure that outlived the retry schedule
    #[error("Giving up after {attempts} attempts: {cause}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        cause: Box<RalphError>,
    },

    /// Tool execution error (never fatal to a loop)
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Iteration budget used up without the promise being kept
    #[error("Max iterations ({0}) reached without completion")]
    MaxIterations(u32),

    /// Run deadline exceeded
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Caller cancelled the run
    #[error("Cancelled")]
    Cancelled,

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl RalphError {
    /// Build a transport error, classifying it from its message
    pub fn transport(message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = is_retryable_message(&message);
        RalphError::Transport { message, retryable }
    }

    /// Build a transport error that is never retried
    pub fn fatal_transport(message: impl Into<String>) -> Self {
        RalphError::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the retry policy may try the failed operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            RalphError::Transport { retryable, .. } => *retryable,
            RalphError::RetriesExhausted { .. } => false,
            _ => false,
        }
    }
}

/// Result type alias for Ralph operations
pub type Result<T> = std::result::Result<T, RalphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = RalphError::Config("prompt cannot be empty".to_string());
        assert_eq!(err.to_string(), "Config error: prompt cannot be empty");
    }

    #[test]
    fn test_session_error() {
        let err = RalphError::Session("no active session".to_string());
        assert_eq!(err.to_string(), "Session error: no active session");
    }

    #[test]
    fn test_max_iterations_error() {
        let err = RalphError::MaxIterations(3);
        assert_eq!(err.to_string(), "Max iterations (3) reached without completion");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_classifies_message() {
        assert!(RalphError::transport("connection reset by peer").is_retryable());
        assert!(!RalphError::transport("authentication failed").is_retryable());
    }

    #[test]
    fn test_fatal_transport_never_retryable() {
        assert!(!RalphError::fatal_transport("unexpected EOF").is_retryable());
    }

    #[test]
    fn test_retries_exhausted_wraps_cause() {
        let err = RalphError::RetriesExhausted {
            attempts: 4,
            cause: Box::new(RalphError::transport("unexpected EOF")),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("4 attempts"));
        assert!(err.to_string().contains("unexpected EOF"));

        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("unexpected EOF"));
    }

    #[test]
    fn test_tool_error_conversion() {
        let err: RalphError = ToolError::UnknownTool("nope".to_string()).into();
        assert!(matches!(err, RalphError::Tool(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(RalphError::Cancelled)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}

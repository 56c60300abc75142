//! Per-run loop configuration.
//!
//! A `LoopConfig` is built once (by the CLI or an embedder) and handed to the
//! engine by value; nothing reads configuration from global state.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::SessionOptions;
use crate::completion::DetectionStrategy;
use crate::error::{RalphError, Result};
use crate::events::DEFAULT_EVENT_CAPACITY;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_PROMISE: &str = "I'm special!";

/// How a system message combines with the backend's own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMessageMode {
    #[default]
    Append,
    Replace,
}

impl SystemMessageMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            other => Err(RalphError::Config(format!(
                "invalid system-message-mode '{}' (expected append or replace)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SystemMessageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub content: String,
    pub mode: SystemMessageMode,
}

impl SystemMessage {
    pub fn new(content: impl Into<String>, mode: SystemMessageMode) -> Self {
        Self {
            content: content.into(),
            mode,
        }
    }
}

/// Immutable configuration of one loop run
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub prompt: String,
    pub model: String,
    pub max_iterations: u32,
    pub timeout: Duration,
    /// Completion phrase; empty means the loop never completes on its own
    pub promise: String,
    pub working_dir: PathBuf,
    pub system_message: Option<SystemMessage>,
    pub detection: DetectionStrategy,
    pub event_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: DEFAULT_MODEL.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: DEFAULT_TIMEOUT,
            promise: DEFAULT_PROMISE.to_string(),
            working_dir: PathBuf::from("."),
            system_message: None,
            detection: DetectionStrategy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl LoopConfig {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_promise(mut self, promise: impl Into<String>) -> Self {
        self.promise = promise.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_system_message(mut self, message: SystemMessage) -> Self {
        self.system_message = Some(message);
        self
    }

    pub fn with_detection(mut self, detection: DetectionStrategy) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Reject configurations a loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(RalphError::Config("prompt cannot be empty".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(RalphError::Config("max-iterations must be positive".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(RalphError::Config("timeout must be positive".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(RalphError::Config("model cannot be empty".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(RalphError::Config("event capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Options for the backend session this loop runs in
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            model: self.model.clone(),
            working_dir: self.working_dir.clone(),
            system_message: self.system_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoopConfig::new("Do X");
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.timeout, Duration::from_secs(1800));
        assert_eq!(config.promise, "I'm special!");
        assert_eq!(config.detection, DetectionStrategy::Marker);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_messages() {
        let cases = [
            (LoopConfig::new(""), "prompt cannot be empty"),
            (LoopConfig::new("   "), "prompt cannot be empty"),
            (LoopConfig::new("x").with_max_iterations(0), "max-iterations must be positive"),
            (LoopConfig::new("x").with_timeout(Duration::ZERO), "timeout must be positive"),
            (LoopConfig::new("x").with_model(""), "model cannot be empty"),
        ];
        for (config, expected) in cases {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, RalphError::Config(_)));
            assert!(err.to_string().contains(expected), "{} !~ {}", err, expected);
        }
    }

    #[test]
    fn test_empty_promise_is_valid() {
        assert!(LoopConfig::new("x").with_promise("").validate().is_ok());
    }

    #[test]
    fn test_system_message_mode_parse() {
        assert_eq!(SystemMessageMode::parse("append").unwrap(), SystemMessageMode::Append);
        assert_eq!(SystemMessageMode::parse("REPLACE").unwrap(), SystemMessageMode::Replace);
        let err = SystemMessageMode::parse("merge").unwrap_err();
        assert!(err.to_string().contains("invalid system-message-mode"));
    }

    #[test]
    fn test_session_options() {
        let config = LoopConfig::new("x")
            .with_model("gpt-5")
            .with_working_dir("/tmp/work")
            .with_system_message(SystemMessage::new("rules", SystemMessageMode::Replace));
        let options = config.session_options();
        assert_eq!(options.model, "gpt-5");
        assert_eq!(options.working_dir, PathBuf::from("/tmp/work"));
        assert_eq!(options.system_message.unwrap().mode, SystemMessageMode::Replace);
    }
}

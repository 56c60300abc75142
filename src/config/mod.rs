//! Configuration for Ralph.
//!
//! Two layers:
//! 1. `Config`: the YAML settings file (`~/.config/ralph/ralph.yml` or `./ralph.yml`)
//! 2. `LoopConfig`: the immutable settings of one run, built from `Config` plus CLI flags

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::ProcessBackend;
use crate::completion::DetectionStrategy;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::session::RetryPolicy;

mod loop_config;

pub use loop_config::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL, DEFAULT_PROMISE, DEFAULT_TIMEOUT, LoopConfig, SystemMessage,
    SystemMessageMode,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub model: String,
    pub max_iterations: u32,
    pub timeout_secs: u64,
    pub promise: String,
    pub detection: DetectionStrategy,
    pub event_capacity: usize,
    pub system_message: Option<String>,
    pub system_message_mode: SystemMessageMode,
    pub retry: RetryConfig,
    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            model: DEFAULT_MODEL.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            promise: DEFAULT_PROMISE.to_string(),
            detection: DetectionStrategy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            system_message: None,
            system_message_mode: SystemMessageMode::default(),
            retry: RetryConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delays_ms: Vec<u64>,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays_ms: vec![1000, 2000, 5000],
            max_attempts: 4,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let delays = self.delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect();
        RetryPolicy::new(delays, self.max_attempts)
    }
}

/// Agent command run by the process backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: "copilot".to_string(),
            args: vec![
                "--model".to_string(),
                "{model}".to_string(),
                "-p".to_string(),
                "{prompt}".to_string(),
            ],
            env: HashMap::new(),
        }
    }
}

impl BackendConfig {
    pub fn build(&self, model: &str) -> ProcessBackend {
        let mut env: Vec<_> = self.env.iter().collect();
        env.sort();
        env.into_iter().fold(
            ProcessBackend::new(self.command.clone(), self.args.clone(), model),
            |backend, (k, v)| backend.env(k.clone(), v.clone()),
        )
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Primary: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary.exists() {
                match Self::load_from_file(&primary) {
                    Ok(config) => return Ok(config),
                    Err(e) => log::warn!("Failed to load config from {}: {}", primary.display(), e),
                }
            }
        }

        // Fallback: ./<project>.yml
        let fallback = PathBuf::from(format!("{}.yml", project_name));
        if fallback.exists() {
            match Self::load_from_file(&fallback) {
                Ok(config) => return Ok(config),
                Err(e) => log::warn!("Failed to load config from {}: {}", fallback.display(), e),
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Loop configuration seeded from these settings
    pub fn loop_config(&self, prompt: impl Into<String>) -> LoopConfig {
        let mut config = LoopConfig::new(prompt)
            .with_model(self.model.clone())
            .with_max_iterations(self.max_iterations)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_promise(self.promise.clone())
            .with_detection(self.detection)
            .with_event_capacity(self.event_capacity);
        if let Some(content) = &self.system_message {
            config = config.with_system_message(SystemMessage::new(content.clone(), self.system_message_mode));
        }
        config
    }
}

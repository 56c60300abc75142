//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use eyre::{Result, eyre};

use ralph::completion::DetectionStrategy;
use ralph::config::{Config, LoopConfig, SystemMessage, SystemMessageMode};

/// Ralph - run an AI assistant in a loop until it keeps its promise
#[derive(Parser, Debug)]
#[command(name = "ralph")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a loop
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Prompt text, or a path to a .md file; read from stdin when omitted
    pub prompt: Option<String>,

    /// Maximum number of iterations
    #[arg(short, long)]
    pub max_iterations: Option<u32>,

    /// Overall timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Completion promise phrase
    #[arg(short, long)]
    pub promise: Option<String>,

    /// Model to use
    #[arg(long)]
    pub model: Option<String>,

    /// Working directory for tools and the backend
    #[arg(short, long)]
    pub working_dir: Option<PathBuf>,

    /// System message, or a path to a file holding it
    #[arg(long)]
    pub system_message: Option<String>,

    /// How the system message combines with the backend's: append or replace
    #[arg(long)]
    pub system_message_mode: Option<String>,

    /// Completion detection: marker or normalized
    #[arg(long)]
    pub detection: Option<String>,

    /// Print the configuration preview and exit
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    /// Merge settings-file values with flags; flags win
    pub fn loop_config(&self, config: &Config, prompt: String) -> Result<LoopConfig> {
        let mut loop_config = config.loop_config(prompt);

        if let Some(n) = self.max_iterations {
            loop_config = loop_config.with_max_iterations(n);
        }
        if let Some(secs) = self.timeout {
            loop_config = loop_config.with_timeout(std::time::Duration::from_secs(secs));
        }
        if let Some(promise) = &self.promise {
            loop_config = loop_config.with_promise(promise.clone());
        }
        if let Some(model) = &self.model {
            loop_config = loop_config.with_model(model.clone());
        }
        if let Some(dir) = &self.working_dir {
            loop_config = loop_config.with_working_dir(dir.clone());
        }
        if let Some(name) = &self.detection {
            let detection = DetectionStrategy::parse(name)
                .ok_or_else(|| eyre!("invalid detection '{}' (expected marker or normalized)", name))?;
            loop_config = loop_config.with_detection(detection);
        }

        let mode = match &self.system_message_mode {
            Some(mode) => SystemMessageMode::parse(mode)?,
            None => config.system_message_mode,
        };
        if let Some(message) = &self.system_message {
            let content = super::prompt::resolve_text_or_file(message)?;
            loop_config = loop_config.with_system_message(SystemMessage::new(content, mode));
        } else if let Some(existing) = loop_config.system_message.take() {
            loop_config = loop_config.with_system_message(SystemMessage::new(existing.content, mode));
        }

        Ok(loop_config)
    }
}

//! CLI module for ralph - argument parsing, prompt resolution and output.

pub mod commands;
pub mod display;
pub mod prompt;

pub use commands::{Cli, Commands, RunArgs};

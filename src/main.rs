use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use ralph::config::Config;
use ralph::engine::LoopEngine;
use ralph::session::RetryingSessionClient;
use ralph::tools::ToolRegistry;

mod cli;

use cli::{Cli, Commands, RunArgs};

/// `--verbose` wins over the settings file; RUST_LOG wins over both
fn default_filter(verbose: bool, log_level: Option<&str>) -> &str {
    match log_level {
        _ if verbose => "debug",
        Some(level) if !level.trim().is_empty() => level.trim(),
        _ => "info",
    }
}

fn setup_logging(verbose: bool, log_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ralph")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("ralph.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let filter = default_filter(verbose, log_level);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_loop(args: &RunArgs, config: &Config) -> Result<i32> {
    let prompt = cli::prompt::resolve_prompt(args.prompt.as_deref())?;
    let loop_config = args.loop_config(config, prompt)?;
    let backend_name = config.backend.command.clone();

    let tools = ToolRegistry::standard(loop_config.working_dir.clone());

    if args.dry_run {
        cli::display::print_config(&loop_config, &backend_name, &tools.tool_names(), true);
        loop_config.validate()?;
        println!("{}", "Configuration is valid".green());
        return Ok(0);
    }

    loop_config.validate()?;
    cli::display::print_config(&loop_config, &backend_name, &tools.tool_names(), false);

    let backend = Arc::new(config.backend.build(&loop_config.model));
    let client = RetryingSessionClient::new(backend, loop_config.session_options(), config.retry.policy())
        .with_event_capacity(loop_config.event_capacity);
    let tools = Arc::new(tools);
    let engine = LoopEngine::new(loop_config, client, tools);

    let cancel = CancellationToken::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling loop");
                cancel.cancel();
            }
        })
    };

    let events = engine.events();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            cli::display::print_event(&event);
        }
    });

    let result = match engine.start(cancel).await {
        Ok(result) => result,
        Err(e) => {
            printer.abort();
            signal.abort();
            return Err(e.into());
        }
    };

    if let Err(e) = printer.await {
        warn!("Event printer failed: {}", e);
    }
    signal.abort();
    if let Err(e) = engine.shutdown().await {
        warn!("Shutdown failed: {}", e);
    }

    cli::display::print_summary(&result);
    Ok(if result.is_success() { 0 } else { 1 })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration first so its log level reaches the logger
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(cli.is_verbose(), config.log_level.as_deref()).context("Failed to setup logging")?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    info!("Starting with config from: {:?}", cli.config);

    let code = match &cli.command {
        Commands::Run(args) => run_loop(args, &config).await.context("Application failed")?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

//! Terminal output: configuration preview, live events and the summary.

use std::io::Write;
use std::time::Duration;

use colored::*;

use ralph::config::LoopConfig;
use ralph::engine::{LoopResult, LoopState};
use ralph::events::Event;

const RULE: &str = "────────────────────────────────────────";

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn preview(text: &str, max: usize) -> String {
    let first = text.lines().next().unwrap_or("");
    if first.chars().count() > max || first.len() < text.trim_end().len() {
        format!("{}...", first.chars().take(max).collect::<String>())
    } else {
        first.to_string()
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

/// Lines of the configuration block
pub fn config_lines(config: &LoopConfig, backend: &str, tools: &[&str]) -> Vec<String> {
    let mut lines = vec![
        format!("Prompt:         {}", preview(&config.prompt, 60)),
        format!("Model:          {}", config.model),
        format!("Backend:        {}", backend),
        format!("Max iterations: {}", config.max_iterations),
        format!("Timeout:        {}", format_duration(config.timeout)),
        format!("Promise:        {}", config.promise),
        format!("Detection:      {}", config.detection),
        format!("Working dir:    {}", config.working_dir.display()),
        format!("Tools:          {}", tools.join(", ")),
    ];
    match &config.system_message {
        Some(message) => lines.push(format!(
            "System message: {} ({})",
            preview(&message.content, 40),
            message.mode
        )),
        None => lines.push(format!("System message: {}", yes_no(false))),
    }
    lines
}

pub fn print_config(config: &LoopConfig, backend: &str, tools: &[&str], dry_run: bool) {
    let title = if dry_run { "Configuration Preview" } else { "Configuration" };
    println!("{}", title.bold().cyan());
    println!("{}", RULE.dimmed());
    for line in config_lines(config, backend, tools) {
        println!("  {}", line);
    }
    println!("{}", RULE.dimmed());
}

/// Print one event as it arrives
pub fn print_event(event: &Event) {
    match event {
        Event::LoopStarted { session_id, model, .. } => {
            println!("{} session {} ({})", "Loop started:".green().bold(), session_id, model);
        }
        Event::IterationStarted {
            iteration,
            max_iterations,
            ..
        } => {
            println!();
            println!("{}", format!("── Iteration {}/{} ──", iteration, max_iterations).cyan().bold());
        }
        Event::TextChunk { text, .. } => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        Event::ToolCallStarted { call, .. } => {
            println!();
            println!("{}", call.info("→").yellow());
        }
        Event::ToolCallResult { call, output, .. } => match output {
            Ok(content) => println!("{} {} {}", "✓".green(), call.name, preview(content, 60).dimmed()),
            Err(message) => println!("{} {} {}", "✗".red(), call.name, message.red()),
        },
        Event::IterationCompleted { iteration, duration, .. } => {
            println!();
            println!(
                "{}",
                format!("Iteration {} finished in {}", iteration, format_duration(*duration)).dimmed()
            );
        }
        Event::CompletionDetected { phrase, .. } => {
            println!("{} {}", "Promise detected:".green().bold(), phrase);
        }
        Event::LoopCancelled { iteration, .. } => {
            println!();
            println!("{} during iteration {}", "Cancelled".yellow().bold(), iteration);
        }
        Event::Error { message, .. } => {
            eprintln!("{} {}", "Error:".red().bold(), message);
        }
        Event::LoopCompleted { .. } => {}
    }
}

/// Lines of the closing summary
pub fn summary_lines(result: &LoopResult) -> Vec<String> {
    let mut lines = vec![
        format!("State:      {}", result.state),
        format!("Iterations: {}", result.iterations),
        format!("Duration:   {}", format_duration(result.duration)),
    ];
    if let Some(message) = result.error_message() {
        lines.push(format!("Error:      {}", message));
    }
    if result.files_changed.is_empty() {
        lines.push("Files changed: none".to_string());
    } else {
        lines.push(format!("Files changed ({}):", result.files_changed.len()));
        lines.extend(result.files_changed.iter().map(|p| format!("  {}", p.display())));
    }
    lines
}

pub fn print_summary(result: &LoopResult) {
    println!();
    println!("{}", "Loop Summary".bold().cyan());
    println!("{}", RULE.dimmed());
    for line in summary_lines(result) {
        let line = match result.state {
            LoopState::Complete if line.starts_with("State:") => line.green().to_string(),
            LoopState::Failed | LoopState::TimedOut if line.starts_with("State:") => line.red().to_string(),
            LoopState::Cancelled if line.starts_with("State:") => line.yellow().to_string(),
            _ => line,
        };
        println!("  {}", line);
    }
    println!("{}", RULE.dimmed());
}

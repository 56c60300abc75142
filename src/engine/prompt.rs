//! Per-iteration prompt construction

use crate::config::LoopConfig;

/// Build the prompt sent for `iteration` (1-based).
///
/// Layout: an `[Iteration i/N]` header, the task prompt, then the instruction
/// for signalling completion (omitted when the promise is empty).
pub fn build_iteration_prompt(config: &LoopConfig, iteration: u32) -> String {
    let mut prompt = format!(
        "[Iteration {}/{}]\n\n{}",
        iteration,
        config.max_iterations,
        config.prompt.trim()
    );
    if !config.promise.trim().is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&config.detection.instruction(config.promise.trim()));
    }
    prompt
}

//! Prompt resolution: literal text, a markdown file, or stdin.

use std::fs;
use std::io::{IsTerminal, Read};
use std::path::Path;

use eyre::{Context, Result, eyre};

/// Resolve the task prompt from the positional argument or stdin
pub fn resolve_prompt(arg: Option<&str>) -> Result<String> {
    match arg {
        Some(arg) if arg.ends_with(".md") => {
            let path = Path::new(arg);
            if !path.is_file() {
                return Err(eyre!("prompt file not found: {}", arg));
            }
            read_file(path)
        }
        Some(arg) => Ok(arg.to_string()),
        None => {
            let stdin = std::io::stdin();
            if stdin.is_terminal() {
                return Err(eyre!("no prompt given (pass PROMPT, a .md file, or pipe it on stdin)"));
            }
            read_from(stdin.lock())
        }
    }
}

/// Text that may name a file; an existing file's contents win
pub fn resolve_text_or_file(value: &str) -> Result<String> {
    let path = Path::new(value);
    if path.is_file() {
        read_file(path)
    } else {
        Ok(value.to_string())
    }
}

fn read_file(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    Ok(content.trim().to_string())
}

fn read_from(mut reader: impl Read) -> Result<String> {
    let mut content = String::new();
    reader.read_to_string(&mut content).context("Failed to read prompt from stdin")?;
    Ok(content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_literal_prompt() {
        assert_eq!(resolve_prompt(Some("Fix the bug")).unwrap(), "Fix the bug");
    }

    #[test]
    fn test_markdown_prompt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task.md");
        fs::write(&path, "# Task\n\nDo X\n").unwrap();
        let prompt = resolve_prompt(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(prompt, "# Task\n\nDo X");
    }

    #[test]
    fn test_missing_markdown_file() {
        let err = resolve_prompt(Some("/nonexistent/task.md")).unwrap_err();
        assert!(err.to_string().contains("prompt file not found"));
    }

    #[test]
    fn test_text_or_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("system.txt");
        fs::write(&path, "Be terse\n").unwrap();
        assert_eq!(resolve_text_or_file(path.to_str().unwrap()).unwrap(), "Be terse");
        assert_eq!(resolve_text_or_file("inline text").unwrap(), "inline text");
    }

    #[test]
    fn test_read_from_reader() {
        let prompt = read_from("  piped prompt\n".as_bytes()).unwrap();
        assert_eq!(prompt, "piped prompt");
    }
}

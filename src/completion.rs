//! Completion detection - decides whether a response keeps the promise.
//!
//! Two strategies exist and the choice is explicit configuration:
//! - `Marker`: the phrase must appear wrapped in `<promise>...</promise>`
//! - `Normalized`: case-insensitive substring search after folding punctuation
//!   and whitespace
//!
//! An empty phrase never matches, whatever the strategy. A whitespace-only
//! phrase counts as empty: both strategies compare trimmed text, so it would
//! otherwise match an empty marker or any reply at all.

use serde::{Deserialize, Serialize};

/// Opening delimiter of a completion marker
pub const PROMISE_OPEN: &str = "<promise>";

/// Closing delimiter of a completion marker
pub const PROMISE_CLOSE: &str = "</promise>";

/// How the detector recognises the completion phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStrategy {
    /// Strict `<promise>PHRASE</promise>` match
    #[default]
    Marker,
    /// Case/punctuation/whitespace tolerant substring match
    Normalized,
}

impl DetectionStrategy {
    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "marker" | "strict" | "tag" => Some(Self::Marker),
            "normalized" | "fuzzy" | "substring" => Some(Self::Normalized),
            _ => None,
        }
    }

    /// How the model is asked to signal completion
    pub fn instruction(&self, phrase: &str) -> String {
        match self {
            Self::Marker => format!(
                "When the task is fully complete, output exactly {}{}{} on its own line. \
                 Do not output it before the work is done.",
                PROMISE_OPEN, phrase, PROMISE_CLOSE
            ),
            Self::Normalized => format!(
                "When the task is fully complete, say the phrase \"{}\". \
                 Do not say it before the work is done.",
                phrase
            ),
        }
    }
}

impl std::fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Marker => write!(f, "marker"),
            Self::Normalized => write!(f, "normalized"),
        }
    }
}

/// Pure, stateless completion detector
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionDetector {
    strategy: DetectionStrategy,
}

impl CompletionDetector {
    pub fn new(strategy: DetectionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> DetectionStrategy {
        self.strategy
    }

    /// Check whether `text` signals completion of `phrase`. Blank phrases never match.
    pub fn detect(&self, text: &str, phrase: &str) -> bool {
        if phrase.trim().is_empty() {
            return false;
        }
        match self.strategy {
            DetectionStrategy::Marker => contains_marker(text, phrase),
            DetectionStrategy::Normalized => contains_normalized(text, phrase),
        }
    }
}

/// Detect a promise with the default (marker) strategy
pub fn detect_promise(text: &str, phrase: &str) -> bool {
    CompletionDetector::default().detect(text, phrase)
}

/// Wrap a phrase in the completion marker
pub fn promise_marker(phrase: &str) -> String {
    format!("{}{}{}", PROMISE_OPEN, phrase, PROMISE_CLOSE)
}

fn contains_marker(text: &str, phrase: &str) -> bool {
    let phrase = phrase.trim();
    let mut from = 0;
    // Pair every closing tag with the nearest opening tag before it
    while let Some(found) = text[from..].find(PROMISE_CLOSE) {
        let close = from + found;
        if let Some(open) = text[..close].rfind(PROMISE_OPEN) {
            if text[open + PROMISE_OPEN.len()..close].trim() == phrase {
                return true;
            }
        }
        from = close + PROMISE_CLOSE.len();
    }
    false
}

fn contains_normalized(text: &str, phrase: &str) -> bool {
    let needle = normalize(phrase);
    if needle.is_empty() {
        return false;
    }
    // Pad with spaces so the phrase only matches on word boundaries
    format!(" {} ", normalize(text)).contains(&format!(" {} ", needle))
}

/// Lowercase, fold punctuation to spaces, collapse whitespace runs
fn normalize(s: &str) -> String {
    let folded: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else if c == '\'' || c == '\u{2019}' {
                // Apostrophes vanish so "I'm" and "Im" compare equal
                '\0'
            } else {
                ' '
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Retry policy and transport error classification

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RalphError;

/// Message fragments (lowercase) that mark a transient transport failure
pub const RETRYABLE_PATTERNS: &[&str] = &[
    "goaway",
    "connection reset",
    "connection refused",
    "connection terminated",
    "unexpected eof",
    "timeout",
    "timed out",
    "stream terminated",
    "broken pipe",
];

/// Default delays between attempts
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
];

/// Whether an error message looks like a transient transport failure
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classify an arbitrary error, walking its source chain.
///
/// `RalphError`s answer for themselves; anything else is judged on the text
/// of each error in the chain.
pub fn classify_retryable(err: Option<&(dyn StdError + 'static)>) -> bool {
    let mut current = err;
    while let Some(e) = current {
        if let Some(ralph) = e.downcast_ref::<RalphError>() {
            return ralph.is_retryable();
        }
        if is_retryable_message(&e.to_string()) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Decides whether a failed attempt may be retried
pub type Classifier = Arc<dyn Fn(&RalphError) -> bool + Send + Sync>;

/// Bounded backoff policy injected into the session client
#[derive(Clone)]
pub struct RetryPolicy {
    /// Delay before retry N (1-based); the last entry repeats
    pub delays: Vec<Duration>,
    /// Total attempts including the first
    pub max_attempts: u32,
    classifier: Classifier,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>, max_attempts: u32) -> Self {
        Self {
            delays,
            max_attempts: max_attempts.max(1),
            classifier: Arc::new(|err: &RalphError| err.is_retryable()),
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self::new(Vec::new(), 1)
    }

    /// Replace the retryable classifier
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&RalphError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn is_retryable(&self, err: &RalphError) -> bool {
        (self.classifier)(err)
    }

    /// Delay to wait after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt.saturating_sub(1) as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    /// Whether another attempt is allowed after `attempt` failed with `err`
    pub fn should_retry(&self, err: &RalphError, attempt: u32) -> bool {
        attempt < self.max_attempts && self.is_retryable(err)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS.to_vec(), DEFAULT_RETRY_DELAYS.len() as u32 + 1)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("delays", &self.delays)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapper {
        inner: std::io::Error,
    }

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "send failed")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.inner)
        }
    }

    fn io(msg: &str) -> std::io::Error {
        std::io::Error::other(msg.to_string())
    }

    #[test]
    fn test_retryable_messages() {
        for msg in [
            "http2: server sent GOAWAY and closed the connection",
            "read tcp: connection reset by peer",
            "dial tcp: connection refused",
            "connection terminated",
            "unexpected EOF",
            "timeout occurred",
            "request timed out",
        ] {
            assert!(is_retryable_message(msg), "expected retryable: {}", msg);
        }
    }

    #[test]
    fn test_fatal_messages() {
        for msg in ["invalid argument", "authentication failed", "model not found"] {
            assert!(!is_retryable_message(msg), "expected fatal: {}", msg);
        }
    }

    #[test]
    fn test_classify_none_is_false() {
        assert!(!classify_retryable(None));
    }

    #[test]
    fn test_classify_plain_errors() {
        let eof = io("unexpected EOF");
        assert!(classify_retryable(Some(&eof)));
        let auth = io("authentication failed");
        assert!(!classify_retryable(Some(&auth)));
    }

    #[test]
    fn test_classify_walks_source_chain() {
        let wrapped = Wrapper {
            inner: io("GOAWAY received"),
        };
        assert!(classify_retryable(Some(&wrapped)));

        let wrapped = Wrapper {
            inner: io("invalid argument"),
        };
        assert!(!classify_retryable(Some(&wrapped)));
    }

    #[test]
    fn test_classify_respects_ralph_errors() {
        let fatal = RalphError::fatal_transport("unexpected EOF");
        assert!(!classify_retryable(Some(&fatal)));

        let exhausted = RalphError::RetriesExhausted {
            attempts: 4,
            cause: Box::new(RalphError::transport("timeout")),
        };
        assert!(!classify_retryable(Some(&exhausted)));
        assert!(classify_retryable(Some(&RalphError::transport("timeout"))));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(9), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = RetryPolicy::default();
        let err = RalphError::transport("connection reset");
        assert!(policy.should_retry(&err, 1));
        assert!(policy.should_retry(&err, 3));
        assert!(!policy.should_retry(&err, 4));
        assert!(!policy.should_retry(&RalphError::transport("authentication failed"), 1));
    }

    #[test]
    fn test_none_policy() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(&RalphError::transport("timeout"), 1));
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_custom_classifier() {
        let policy = RetryPolicy::default().with_classifier(|e| e.to_string().contains("503"));
        assert!(policy.is_retryable(&RalphError::fatal_transport("status 503")));
        assert!(!policy.is_retryable(&RalphError::transport("timeout")));
    }
}

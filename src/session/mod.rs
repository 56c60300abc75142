//! Conversation sessions and the retrying client that owns them.

pub mod client;
pub mod history;
pub mod retry;

pub use client::{RetryingSessionClient, SessionEvent};
pub use history::{Message, Role, Session};
pub use retry::{Classifier, RetryPolicy, classify_retryable, is_retryable_message};

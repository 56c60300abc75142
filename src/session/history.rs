//! Session and conversation history types

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant message with the tool calls it made
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            timestamp: Utc::now(),
        }
    }
}

/// Local mirror of a backend conversation.
///
/// History is append-only; readers take a snapshot under the session's own
/// lock so they can observe it while the engine appends.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    history: RwLock<Vec<Message>>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn add_message(&self, message: Message) {
        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        history.push(message);
    }

    /// Snapshot of the history
    pub fn history(&self) -> Vec<Message> {
        self.history.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.history.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_message(&self) -> Option<Message> {
        self.history.read().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_session_ids_are_unique() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.id(), b.id());
        assert!(!a.id().is_empty());
    }

    #[test]
    fn test_history_is_ordered() {
        let session = Session::new();
        assert!(session.is_empty());

        session.add_message(Message::user("Do X"));
        session.add_message(Message::assistant("Working on it", vec![]));

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "Do X");
        assert_eq!(history[1].role, Role::Assistant);
        assert!(history[1].timestamp >= history[0].timestamp);
    }

    #[test]
    fn test_assistant_message_keeps_tool_calls() {
        let call = ToolCall::new("t1", "read_file").with_param("path", "a.txt");
        let msg = Message::assistant("done", vec![call.clone()]);
        assert_eq!(msg.tool_calls, vec![call]);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let session = Arc::new(Session::new());
        let writer = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                for i in 0..100 {
                    session.add_message(Message::user(format!("msg {}", i)));
                }
            })
        };

        for _ in 0..100 {
            let _ = session.len();
            let _ = session.id();
        }
        writer.join().unwrap();

        assert_eq!(session.len(), 100);
        assert_eq!(session.last_message().unwrap().content, "msg 99");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}

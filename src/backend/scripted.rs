//! Scripted backend - replays canned responses.
//!
//! Each `send` consumes the next queued `ScriptedResponse` (or the fallback
//! once the queue is empty). Calls are recorded so callers can assert on
//! exactly what reached the backend.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{RalphError, Result};
use crate::tools::ToolCall;

use super::{Backend, BackendEvent, SessionOptions};

/// One canned answer to a prompt
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    events: Vec<BackendEvent>,
    send_error: Option<String>,
    hang: bool,
}

impl ScriptedResponse {
    /// Stream exactly these events
    pub fn events(events: Vec<BackendEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    /// A plain text answer followed by completion
    pub fn text(text: impl Into<String>) -> Self {
        Self::events(vec![BackendEvent::text(text), BackendEvent::complete()])
    }

    /// Fail the send call itself
    pub fn fail_send(message: impl Into<String>) -> Self {
        Self {
            send_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Report an error in-stream
    pub fn stream_error(message: impl Into<String>) -> Self {
        Self::events(vec![BackendEvent::error(message)])
    }

    /// Emit text, then close the stream without completing
    pub fn truncated(text: impl Into<String>) -> Self {
        Self::events(vec![BackendEvent::text(text)])
    }

    /// Never answer; the stream stays open until cancelled
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    /// Ask the client to run a tool before the response finishes
    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        let at = self
            .events
            .iter()
            .position(BackendEvent::is_final)
            .unwrap_or(self.events.len());
        self.events.insert(at, BackendEvent::ToolCall(call));
        self
    }

    /// Keep the stream open after the scripted events
    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// In-memory backend driven by a response script
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    model: String,
    responses: Mutex<VecDeque<ScriptedResponse>>,
    fallback: Option<ScriptedResponse>,
    start_error: Option<String>,
    prompts: Mutex<Vec<String>>,
    sessions: Mutex<HashSet<String>>,
    started: AtomicUsize,
    stopped: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ScriptedBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Queue a response
    pub fn with_response(self, response: ScriptedResponse) -> Self {
        lock(&self.responses).push_back(response);
        self
    }

    /// Queue several responses
    pub fn with_responses(self, responses: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        lock(&self.responses).extend(responses);
        self
    }

    /// Response used once the queue is empty
    pub fn with_fallback(mut self, response: ScriptedResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Make `start` fail
    pub fn with_start_error(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Every prompt that reached `send`, in order
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn send_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn start_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn created_sessions(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed_sessions(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Sessions created and not yet destroyed
    pub fn active_sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    fn next_response(&self) -> Result<ScriptedResponse> {
        if let Some(response) = lock(&self.responses).pop_front() {
            return Ok(response);
        }
        self.fallback
            .clone()
            .ok_or_else(|| RalphError::fatal_transport("scripted backend has no more responses"))
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn start(&self) -> Result<()> {
        if let Some(message) = &self.start_error {
            return Err(RalphError::fatal_transport(message.clone()));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_session(&self, _options: &SessionOptions) -> Result<String> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = format!("scripted-{}", n);
        lock(&self.sessions).insert(handle.clone());
        Ok(handle)
    }

    async fn destroy_session(&self, handle: &str) -> Result<()> {
        if lock(&self.sessions).remove(handle) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send(
        &self,
        handle: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<BackendEvent>> {
        lock(&self.prompts).push(prompt.to_string());

        if !lock(&self.sessions).contains(handle) {
            return Err(RalphError::fatal_transport(format!("unknown session: {}", handle)));
        }

        let response = self.next_response()?;
        if let Some(message) = response.send_error {
            return Err(RalphError::transport(message));
        }

        debug!(
            "ScriptedBackend::send: {} events (hang: {})",
            response.events.len(),
            response.hang
        );
        let (tx, rx) = mpsc::channel(response.events.len() + 1);
        tokio::spawn(async move {
            for event in response.events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if response.hang {
                cancel.cancelled().await;
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut rx: mpsc::Receiver<BackendEvent>) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_replays_in_order() {
        let backend = ScriptedBackend::new("m")
            .with_response(ScriptedResponse::text("one"))
            .with_response(ScriptedResponse::text("two"));
        let handle = backend.create_session(&SessionOptions::default()).await.unwrap();
        let cancel = CancellationToken::new();

        let first = drain(backend.send(&handle, "p1", cancel.clone()).await.unwrap()).await;
        let second = drain(backend.send(&handle, "p2", cancel.clone()).await.unwrap()).await;

        assert_eq!(first[0], BackendEvent::text("one"));
        assert_eq!(second[0], BackendEvent::text("two"));
        assert_eq!(backend.prompts(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let backend = ScriptedBackend::new("m");
        let handle = backend.create_session(&SessionOptions::default()).await.unwrap();
        let err = backend.send(&handle, "p", CancellationToken::new()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fallback_repeats() {
        let backend = ScriptedBackend::new("m").with_fallback(ScriptedResponse::text("again"));
        let handle = backend.create_session(&SessionOptions::default()).await.unwrap();
        for _ in 0..3 {
            let events = drain(backend.send(&handle, "p", CancellationToken::new()).await.unwrap()).await;
            assert_eq!(events.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_tool_call_inserted_before_completion() {
        let call = ToolCall::new("t1", "read_file");
        let response = ScriptedResponse::text("x").with_tool_call(call.clone());
        assert_eq!(response.events[1], BackendEvent::ToolCall(call));
        assert!(response.events[2].is_final());
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let backend = ScriptedBackend::new("m").with_fallback(ScriptedResponse::text("x"));
        let err = backend.send("nope", "p", CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("unknown session"));
    }

    #[tokio::test]
    async fn test_session_accounting() {
        let backend = ScriptedBackend::new("m");
        let handle = backend.create_session(&SessionOptions::default()).await.unwrap();
        assert_eq!(backend.active_sessions(), 1);
        backend.destroy_session(&handle).await.unwrap();
        backend.destroy_session(&handle).await.unwrap();
        assert_eq!(backend.active_sessions(), 0);
        assert_eq!(backend.destroyed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_hang_releases_on_cancel() {
        let backend = ScriptedBackend::new("m").with_response(ScriptedResponse::hang());
        let handle = backend.create_session(&SessionOptions::default()).await.unwrap();
        let cancel = CancellationToken::new();
        let rx = backend.send(&handle, "p", cancel.clone()).await.unwrap();
        cancel.cancel();
        let events = tokio::time::timeout(std::time::Duration::from_secs(2), drain(rx))
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}

//! Session client with bounded retry of transient transport failures

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendEvent, SessionOptions};
use crate::error::{RalphError, Result};
use crate::events::{DEFAULT_EVENT_CAPACITY, EventSender, EventStream, channel};
use crate::tools::ToolCall;

use super::history::{Message, Session};
use super::retry::RetryPolicy;

/// What the session client reports while a prompt is being answered
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Text(String),
    ToolCall(ToolCall),
    /// A tool the backend ran on its own
    ToolResult {
        call: ToolCall,
        output: String,
        is_error: bool,
    },
    /// The previous attempt failed and is being retried; discard its partial output
    Retrying {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    ResponseComplete {
        content: String,
    },
    Error(Arc<RalphError>),
}

#[derive(Default)]
struct ClientState {
    started: bool,
    session: Option<Arc<Session>>,
    handle: Option<String>,
}

/// Owns one backend conversation at a time and retries transient failures
pub struct RetryingSessionClient {
    backend: Arc<dyn Backend>,
    options: SessionOptions,
    policy: RetryPolicy,
    event_capacity: usize,
    state: Mutex<ClientState>,
}

impl RetryingSessionClient {
    pub fn new(backend: Arc<dyn Backend>, options: SessionOptions, policy: RetryPolicy) -> Self {
        Self {
            backend,
            options,
            policy,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Set the capacity of per-prompt event streams
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn is_started(&self) -> bool {
        self.state.lock().await.started
    }

    /// Connect to the backend. Calls after the first success are no-ops.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut ClientState) -> Result<()> {
        if state.started {
            return Ok(());
        }
        self.backend.start().await?;
        state.started = true;
        info!("Session client started (model: {})", self.backend.model());
        Ok(())
    }

    /// Release the backend connection, destroying any active session first
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.started {
            return Ok(());
        }
        if let Err(e) = self.destroy_locked(&mut state).await {
            warn!("Failed to destroy session while stopping: {}", e);
        }
        self.backend.stop().await?;
        state.started = false;
        info!("Session client stopped");
        Ok(())
    }

    /// Create a session, starting the client if needed
    pub async fn create_session(&self) -> Result<Arc<Session>> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state)
            .await
            .map_err(|e| RalphError::Session(format!("failed to start client: {}", e)))?;

        if state.handle.is_some() {
            debug!("Replacing existing session");
            self.destroy_locked(&mut state).await?;
        }

        let handle = self
            .backend
            .create_session(&self.options)
            .await
            .map_err(|e| RalphError::Session(format!("failed to create session: {}", e)))?;

        let session = Arc::new(Session::new());
        if let Some(system) = &self.options.system_message {
            session.add_message(Message::user(system.content.clone()));
        }

        info!("Created session {} (backend handle {})", session.id(), handle);
        state.session = Some(Arc::clone(&session));
        state.handle = Some(handle);
        Ok(session)
    }

    /// Destroy the active session. A no-op when there is none.
    pub async fn destroy_session(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.destroy_locked(&mut state).await
    }

    async fn destroy_locked(&self, state: &mut ClientState) -> Result<()> {
        let Some(handle) = state.handle.take() else {
            return Ok(());
        };
        let session = state.session.take();
        self.backend
            .destroy_session(&handle)
            .await
            .map_err(|e| RalphError::Session(format!("failed to destroy session: {}", e)))?;
        if let Some(session) = session {
            debug!("Destroyed session {}", session.id());
        }
        Ok(())
    }

    /// The active session, if any
    pub async fn session(&self) -> Option<Arc<Session>> {
        self.state.lock().await.session.clone()
    }

    /// Send a prompt on the active session.
    ///
    /// The returned stream ends after `ResponseComplete` or `Error`, or
    /// without a final event when `cancel` fires.
    pub async fn send_prompt(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<EventStream<SessionEvent>> {
        let handle = self
            .state
            .lock()
            .await
            .handle
            .clone()
            .ok_or_else(|| RalphError::Session("no active session".to_string()))?;

        let (tx, rx) = channel(self.event_capacity);
        let relay = Relay {
            backend: Arc::clone(&self.backend),
            handle,
            prompt: prompt.to_string(),
            policy: self.policy.clone(),
            tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(relay.run());
        Ok(rx)
    }
}

/// Outcome of forwarding one backend attempt
enum Attempt {
    Complete,
    /// Cancelled, or the consumer went away
    Abandoned,
    Failed(RalphError),
}

/// Drives one prompt through the backend, retrying per policy
struct Relay {
    backend: Arc<dyn Backend>,
    handle: String,
    prompt: String,
    policy: RetryPolicy,
    tx: EventSender<SessionEvent>,
    cancel: CancellationToken,
}

impl Relay {
    async fn run(self) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                break;
            }

            let failure = match self.backend.send(&self.handle, &self.prompt, self.cancel.clone()).await {
                Ok(rx) => match self.forward(rx).await {
                    Attempt::Complete | Attempt::Abandoned => break,
                    Attempt::Failed(err) => err,
                },
                Err(err) => err,
            };

            if self.cancel.is_cancelled() {
                break;
            }

            if !self.policy.should_retry(&failure, attempt) {
                let err = if self.policy.is_retryable(&failure) {
                    warn!("Giving up after {} attempts: {}", attempt, failure);
                    RalphError::RetriesExhausted {
                        attempts: attempt,
                        cause: Box::new(failure),
                    }
                } else {
                    debug!("Relay: fatal failure on attempt {}: {}", attempt, failure);
                    failure
                };
                self.emit(SessionEvent::Error(Arc::new(err))).await;
                break;
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                "Attempt {} failed ({}), retrying in {:?}",
                attempt, failure, delay
            );
            let delivered = self
                .emit(SessionEvent::Retrying {
                    attempt,
                    delay,
                    reason: failure.to_string(),
                })
                .await;
            if !delivered {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.tx.close().await;
    }

    async fn forward(&self, mut rx: mpsc::Receiver<BackendEvent>) -> Attempt {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Attempt::Abandoned,
                event = rx.recv() => event,
            };

            let event = match next {
                None => {
                    return Attempt::Failed(RalphError::transport(
                        "response stream closed before completion: unexpected EOF",
                    ));
                }
                Some(BackendEvent::Error { message }) => {
                    return Attempt::Failed(RalphError::transport(message));
                }
                Some(BackendEvent::Text { text }) => SessionEvent::Text(text),
                Some(BackendEvent::ToolCall(call)) => SessionEvent::ToolCall(call),
                Some(BackendEvent::ToolResult { call, output, is_error }) => {
                    SessionEvent::ToolResult { call, output, is_error }
                }
                Some(BackendEvent::ResponseComplete { content }) => {
                    self.emit(SessionEvent::ResponseComplete { content }).await;
                    return Attempt::Complete;
                }
            };

            if !self.emit(event).await {
                return Attempt::Abandoned;
            }
        }
    }

    async fn emit(&self, event: SessionEvent) -> bool {
        self.tx.send(event, &self.cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedResponse};
    use crate::config::{SystemMessage, SystemMessageMode};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(vec![Duration::from_millis(1)], 4)
    }

    fn client_for(backend: Arc<ScriptedBackend>) -> RetryingSessionClient {
        let options = SessionOptions {
            model: "gpt-4".to_string(),
            ..Default::default()
        };
        RetryingSessionClient::new(backend, options, fast_policy())
    }

    async fn drain(stream: EventStream<SessionEvent>) -> Vec<SessionEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4"));
        let client = client_for(Arc::clone(&backend));

        client.start().await.unwrap();
        client.start().await.unwrap();
        assert!(client.is_started().await);
        assert_eq!(backend.start_count(), 1);

        client.stop().await.unwrap();
        client.stop().await.unwrap();
        assert!(!client.is_started().await);
        assert_eq!(backend.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_create_session_auto_starts() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4"));
        let client = client_for(Arc::clone(&backend));

        let session = client.create_session().await.unwrap();
        assert!(client.is_started().await);
        assert!(!session.id().is_empty());
        assert!(session.is_empty());
        assert_eq!(client.session().await.unwrap().id(), session.id());
    }

    #[tokio::test]
    async fn test_create_session_records_system_message() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4"));
        let options = SessionOptions {
            model: "gpt-4".to_string(),
            system_message: Some(SystemMessage::new("Be terse", SystemMessageMode::Append)),
            ..Default::default()
        };
        let client = RetryingSessionClient::new(backend, options, fast_policy());

        let session = client.create_session().await.unwrap();
        let history = session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Be terse");
    }

    #[tokio::test]
    async fn test_create_session_start_failure_is_session_error() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4").with_start_error("not installed"));
        let client = client_for(backend);

        let err = client.create_session().await.unwrap_err();
        assert!(matches!(err, RalphError::Session(_)));
    }

    #[tokio::test]
    async fn test_destroy_without_session_is_noop() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4"));
        let client = client_for(Arc::clone(&backend));

        client.destroy_session().await.unwrap();
        assert_eq!(backend.destroyed_sessions(), 0);
    }

    #[tokio::test]
    async fn test_destroy_session_clears_reference() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4"));
        let client = client_for(Arc::clone(&backend));

        client.create_session().await.unwrap();
        client.destroy_session().await.unwrap();
        assert!(client.session().await.is_none());
        assert_eq!(backend.destroyed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_stop_destroys_session() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4"));
        let client = client_for(Arc::clone(&backend));

        client.create_session().await.unwrap();
        client.stop().await.unwrap();
        assert!(client.session().await.is_none());
        assert_eq!(backend.destroyed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_send_without_session_fails() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4"));
        let client = client_for(backend);

        let err = client
            .send_prompt(&CancellationToken::new(), "hello")
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no active session"));
    }

    #[tokio::test]
    async fn test_send_streams_response() {
        let backend = Arc::new(
            ScriptedBackend::new("gpt-4").with_response(ScriptedResponse::text("Hello there")),
        );
        let client = client_for(Arc::clone(&backend));
        client.create_session().await.unwrap();

        let events = drain(client.send_prompt(&CancellationToken::new(), "hi").await.unwrap()).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SessionEvent::Text(t) if t == "Hello there"));
        assert!(matches!(events[1], SessionEvent::ResponseComplete { .. }));
        assert_eq!(backend.prompts(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_retries_transient_failure() {
        let backend = Arc::new(
            ScriptedBackend::new("gpt-4")
                .with_response(ScriptedResponse::fail_send("connection reset by peer"))
                .with_response(ScriptedResponse::text("recovered")),
        );
        let client = client_for(Arc::clone(&backend));
        client.create_session().await.unwrap();

        let events = drain(client.send_prompt(&CancellationToken::new(), "hi").await.unwrap()).await;
        assert!(matches!(events[0], SessionEvent::Retrying { attempt: 1, .. }));
        assert!(matches!(&events[1], SessionEvent::Text(t) if t == "recovered"));
        assert!(matches!(events[2], SessionEvent::ResponseComplete { .. }));
        assert_eq!(backend.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_without_completion_is_retried() {
        let backend = Arc::new(
            ScriptedBackend::new("gpt-4")
                .with_response(ScriptedResponse::truncated("partial"))
                .with_response(ScriptedResponse::text("full answer")),
        );
        let client = client_for(Arc::clone(&backend));
        client.create_session().await.unwrap();

        let events = drain(client.send_prompt(&CancellationToken::new(), "hi").await.unwrap()).await;
        assert!(matches!(&events[0], SessionEvent::Text(t) if t == "partial"));
        assert!(matches!(events[1], SessionEvent::Retrying { .. }));
        assert!(matches!(&events[2], SessionEvent::Text(t) if t == "full answer"));
        assert!(matches!(events[3], SessionEvent::ResponseComplete { .. }));
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let backend = Arc::new(
            ScriptedBackend::new("gpt-4")
                .with_response(ScriptedResponse::stream_error("authentication failed"))
                .with_response(ScriptedResponse::text("never used")),
        );
        let client = client_for(Arc::clone(&backend));
        client.create_session().await.unwrap();

        let events = drain(client.send_prompt(&CancellationToken::new(), "hi").await.unwrap()).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Error(err) => assert!(err.to_string().contains("authentication failed")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(backend.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let backend = Arc::new(
            ScriptedBackend::new("gpt-4").with_fallback(ScriptedResponse::fail_send("unexpected EOF")),
        );
        let client = client_for(Arc::clone(&backend));
        client.create_session().await.unwrap();

        let events = drain(client.send_prompt(&CancellationToken::new(), "hi").await.unwrap()).await;
        let retries = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Retrying { .. }))
            .count();
        assert_eq!(retries, 3);
        match events.last().unwrap() {
            SessionEvent::Error(err) => match err.as_ref() {
                RalphError::RetriesExhausted { attempts, cause } => {
                    assert_eq!(*attempts, 4);
                    assert!(cause.to_string().contains("unexpected EOF"));
                }
                other => panic!("unexpected error: {:?}", other),
            },
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(backend.prompts().len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_closes_stream_without_error() {
        let backend = Arc::new(ScriptedBackend::new("gpt-4").with_response(ScriptedResponse::hang()));
        let client = client_for(backend);
        client.create_session().await.unwrap();

        let cancel = CancellationToken::new();
        let stream = client.send_prompt(&cancel, "hi").await.unwrap();
        cancel.cancel();

        let events = tokio::time::timeout(Duration::from_secs(2), drain(stream))
            .await
            .expect("stream should close after cancel");
        assert!(events.iter().all(|e| !matches!(e, SessionEvent::Error(_))));
    }
}

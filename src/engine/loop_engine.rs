//! Loop engine - drives prompt/response iterations until the promise is kept.
//!
//! Each iteration:
//! 1. Checks cancellation, then the deadline, then the iteration budget
//! 2. Sends the iteration prompt through the session client
//! 3. Streams text into a response buffer and runs requested tools
//! 4. On response completion, records history and runs completion detection
//!
//! Every terminal transition goes through `finish`, which caches the result,
//! emits the closing events, closes the event stream and destroys the session.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::completion::CompletionDetector;
use crate::config::LoopConfig;
use crate::error::{RalphError, Result};
use crate::events::{Event, EventSender, EventStream, channel};
use crate::session::{Message, RetryingSessionClient, Session, SessionEvent};
use crate::tools::{ToolCall, ToolExecutor};

use super::files::FileChangeSet;
use super::prompt::build_iteration_prompt;
use super::state::{LoopResult, LoopState};

/// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// How long closing events wait for room in a full event channel
const CLOSING_EMIT_GRACE: Duration = Duration::from_secs(1);

/// Mutable engine fields, all under one lock
#[derive(Default)]
struct EngineState {
    state: LoopState,
    iteration: u32,
    started_at: Option<Instant>,
    /// Set once the run may produce events
    emitting: bool,
    files: FileChangeSet,
    session: Option<Arc<Session>>,
    result: Option<LoopResult>,
}

/// How a run ended
struct Outcome {
    state: LoopState,
    error: Option<Arc<RalphError>>,
}

impl Outcome {
    fn complete() -> Self {
        Self {
            state: LoopState::Complete,
            error: None,
        }
    }

    fn failed(error: RalphError) -> Self {
        Self::failed_with(Arc::new(error))
    }

    fn failed_with(error: Arc<RalphError>) -> Self {
        Self {
            state: LoopState::Failed,
            error: Some(error),
        }
    }

    fn cancelled() -> Self {
        Self {
            state: LoopState::Cancelled,
            error: Some(Arc::new(RalphError::Cancelled)),
        }
    }

    fn timed_out(timeout: Duration) -> Self {
        Self {
            state: LoopState::TimedOut,
            error: Some(Arc::new(RalphError::Timeout(timeout))),
        }
    }
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

enum IterationEnd {
    Detected,
    NotDetected,
    Stopped(Outcome),
}

/// Race `fut` against cancellation and the run deadline
async fn interruptible<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    deadline: Instant,
) -> std::result::Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(Interrupt::TimedOut),
        out = fut => Ok(out),
    }
}

/// Runs one loop to a terminal state
pub struct LoopEngine {
    config: LoopConfig,
    client: RetryingSessionClient,
    tools: Arc<dyn ToolExecutor>,
    detector: CompletionDetector,
    events: EventSender<Event>,
    /// Handed out by `events`; released when the run starts so that only
    /// subscribers keep the queue alive
    stream: Mutex<Option<EventStream<Event>>>,
    inner: Mutex<EngineState>,
}

impl LoopEngine {
    pub fn new(config: LoopConfig, client: RetryingSessionClient, tools: Arc<dyn ToolExecutor>) -> Self {
        let (events, stream) = channel(config.event_capacity);
        let detector = CompletionDetector::new(config.detection);
        Self {
            config,
            client,
            tools,
            detector,
            events,
            stream: Mutex::new(Some(stream)),
            inner: Mutex::new(EngineState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle for observing this loop's events. Clones share one queue.
    ///
    /// Subscribe before `start`: once the run begins, events go only to
    /// existing handles and a late call gets an already-closed stream.
    /// Without any subscriber, events are discarded.
    pub fn events(&self) -> EventStream<Event> {
        let stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        match stream.as_ref() {
            Some(stream) => stream.clone(),
            None => channel(1).1,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn client(&self) -> &RetryingSessionClient {
        &self.client
    }

    pub fn state(&self) -> LoopState {
        self.lock().state
    }

    pub fn iteration(&self) -> u32 {
        self.lock().iteration
    }

    /// Session of the current or finished run; history survives termination
    pub fn session(&self) -> Option<Arc<Session>> {
        self.lock().session.clone()
    }

    pub fn files_changed(&self) -> Vec<PathBuf> {
        self.lock().files.paths()
    }

    /// The cached terminal result, once there is one
    pub fn result(&self) -> Option<LoopResult> {
        self.lock().result.clone()
    }

    /// Run the loop to a terminal state.
    ///
    /// Returns `Err` only for an invalid configuration or when a run is
    /// already in progress. Once terminal, every call returns the same result.
    pub async fn start(&self, cancel: CancellationToken) -> Result<LoopResult> {
        {
            let mut inner = self.lock();
            if let Some(result) = &inner.result {
                debug!("LoopEngine::start: already terminal ({})", result.state);
                return Ok(result.clone());
            }
            if inner.state == LoopState::Running {
                return Err(RalphError::InvalidState("loop is already running".to_string()));
            }
            self.config.validate()?;
            inner.state = LoopState::Running;
            inner.started_at = Some(Instant::now());
        }
        self.stream.lock().unwrap_or_else(|e| e.into_inner()).take();

        info!(
            "Loop starting: model={}, max_iterations={}, timeout={:?}",
            self.config.model, self.config.max_iterations, self.config.timeout
        );

        if cancel.is_cancelled() {
            return Ok(self.finish(Outcome::cancelled(), &cancel).await);
        }

        self.lock().emitting = true;
        let session = match self.client.create_session().await {
            Ok(session) => session,
            Err(e) => return Ok(self.finish(Outcome::failed(e), &cancel).await),
        };
        self.lock().session = Some(Arc::clone(&session));

        self.emit(
            Event::loop_started(session.id(), &self.config.model, self.config.max_iterations),
            &cancel,
            self.deadline(),
        )
        .await;

        // Tears down in-flight backend work once the run ends
        let run = cancel.child_token();
        let mut outcome = self.run_iterations(&session, &cancel, &run).await;
        run.cancel();
        if cancel.is_cancelled() && outcome.state != LoopState::Cancelled {
            debug!("LoopEngine::start: cancellation overrides {}", outcome.state);
            outcome = Outcome::cancelled();
        }
        Ok(self.finish(outcome, &cancel).await)
    }

    /// Destroy the session and stop the client
    pub async fn shutdown(&self) -> Result<()> {
        self.client.destroy_session().await?;
        self.client.stop().await
    }

    fn deadline(&self) -> Instant {
        let started = self.lock().started_at.unwrap_or_else(Instant::now);
        started
            .checked_add(self.config.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE)
    }

    async fn run_iterations(
        &self,
        session: &Session,
        cancel: &CancellationToken,
        run: &CancellationToken,
    ) -> Outcome {
        let max = self.config.max_iterations;
        let deadline = self.deadline();

        loop {
            if cancel.is_cancelled() {
                return Outcome::cancelled();
            }
            if Instant::now() >= deadline {
                return Outcome::timed_out(self.config.timeout);
            }
            let iteration = {
                let mut inner = self.lock();
                if inner.iteration >= max {
                    return Outcome::failed(RalphError::MaxIterations(max));
                }
                inner.iteration += 1;
                inner.iteration
            };

            match self.run_iteration(iteration, session, cancel, run, deadline).await {
                IterationEnd::Detected => return Outcome::complete(),
                IterationEnd::NotDetected if iteration >= max => {
                    return Outcome::failed(RalphError::MaxIterations(max));
                }
                IterationEnd::NotDetected => {}
                IterationEnd::Stopped(outcome) => return outcome,
            }
        }
    }

    async fn run_iteration(
        &self,
        iteration: u32,
        session: &Session,
        cancel: &CancellationToken,
        run: &CancellationToken,
        deadline: Instant,
    ) -> IterationEnd {
        let max = self.config.max_iterations;
        let prompt = build_iteration_prompt(&self.config, iteration);
        let started = Instant::now();

        info!("Iteration {}/{} starting", iteration, max);
        self.emit(Event::iteration_started(iteration, max), cancel, deadline).await;

        let stream = match interruptible(self.client.send_prompt(run, &prompt), cancel, deadline).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return IterationEnd::Stopped(Outcome::failed(e)),
            Err(interrupt) => return IterationEnd::Stopped(self.interrupted(interrupt)),
        };

        let mut response = String::new();
        let mut tool_calls = Vec::new();
        loop {
            let next = match interruptible(stream.recv(), cancel, deadline).await {
                Ok(next) => next,
                Err(interrupt) => return IterationEnd::Stopped(self.interrupted(interrupt)),
            };

            match next {
                None if cancel.is_cancelled() => return IterationEnd::Stopped(Outcome::cancelled()),
                None => {
                    return IterationEnd::Stopped(Outcome::failed(RalphError::transport(
                        "response stream ended without completion",
                    )));
                }
                Some(SessionEvent::Text(text)) => {
                    response.push_str(&text);
                    self.emit(Event::text_chunk(iteration, text), cancel, deadline).await;
                }
                Some(SessionEvent::ToolCall(call)) => {
                    if let Err(interrupt) = self.run_tool(iteration, &call, cancel, deadline).await {
                        return IterationEnd::Stopped(self.interrupted(interrupt));
                    }
                    tool_calls.push(call);
                }
                Some(SessionEvent::ToolResult { call, output, is_error }) => {
                    let output = if is_error {
                        warn!("Backend tool {} failed: {}", call.name, output);
                        Err(output)
                    } else {
                        self.record_files(self.tools.touched_paths(&call));
                        Ok(output)
                    };
                    self.emit(Event::tool_call_result(iteration, call.clone(), output), cancel, deadline)
                        .await;
                    tool_calls.push(call);
                }
                Some(SessionEvent::Retrying { attempt, delay, reason }) => {
                    warn!(
                        "Iteration {}: attempt {} failed ({}), retrying in {:?}",
                        iteration, attempt, reason, delay
                    );
                    response.clear();
                }
                Some(SessionEvent::ResponseComplete { content }) => {
                    if response.is_empty() {
                        response = content;
                    }
                    session.add_message(Message::user(prompt));
                    session.add_message(Message::assistant(response.clone(), tool_calls));
                    return self
                        .complete_iteration(iteration, &response, started.elapsed(), cancel, deadline)
                        .await;
                }
                Some(SessionEvent::Error(err)) => {
                    warn!("Iteration {} failed: {}", iteration, err);
                    return IterationEnd::Stopped(Outcome::failed_with(err));
                }
            }
        }
    }

    async fn complete_iteration(
        &self,
        iteration: u32,
        response: &str,
        duration: Duration,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> IterationEnd {
        info!(
            "Iteration {}/{} complete in {:?}",
            iteration, self.config.max_iterations, duration
        );
        self.emit(Event::iteration_completed(iteration, duration), cancel, deadline)
            .await;

        if self.detector.detect(response, &self.config.promise) {
            info!("Completion promise detected in iteration {}", iteration);
            self.emit(Event::completion_detected(iteration, &self.config.promise), cancel, deadline)
                .await;
            IterationEnd::Detected
        } else {
            IterationEnd::NotDetected
        }
    }

    /// Run one tool call. Tool failures are reported, never fatal.
    async fn run_tool(
        &self,
        iteration: u32,
        call: &ToolCall,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> std::result::Result<(), Interrupt> {
        debug!("Tool call {} ({})", call.name, call.id);
        self.emit(Event::tool_call_started(iteration, call.clone()), cancel, deadline)
            .await;

        let output = match interruptible(self.tools.execute(call), cancel, deadline).await? {
            Ok(output) => {
                self.record_files(output.changed_files);
                Ok(output.content)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", call.name, e);
                Err(e.to_string())
            }
        };

        self.emit(Event::tool_call_result(iteration, call.clone(), output), cancel, deadline)
            .await;
        Ok(())
    }

    fn record_files(&self, paths: Vec<PathBuf>) {
        if !paths.is_empty() {
            self.lock().files.extend(paths);
        }
    }

    fn interrupted(&self, interrupt: Interrupt) -> Outcome {
        match interrupt {
            Interrupt::Cancelled => Outcome::cancelled(),
            Interrupt::TimedOut => {
                warn!("Loop timed out after {:?}", self.config.timeout);
                Outcome::timed_out(self.config.timeout)
            }
        }
    }

    /// Emit an event, waiting for room at most until `deadline`.
    /// Nobody has to read the stream, so a full channel must not stall the run.
    async fn emit(&self, event: Event, cancel: &CancellationToken, deadline: Instant) {
        let kind = event.event_type();
        debug!("emit {}", kind);
        let sent = tokio::select! {
            biased;
            sent = self.events.send(event, cancel) => sent,
            _ = tokio::time::sleep_until(deadline) => false,
        };
        if !sent {
            debug!("emit {}: dropped", kind);
        }
    }

    /// The single terminal transition
    async fn finish(&self, outcome: Outcome, cancel: &CancellationToken) -> LoopResult {
        let (result, emitting) = {
            let mut inner = self.lock();
            if let Some(result) = &inner.result {
                return result.clone();
            }
            let result = LoopResult {
                state: outcome.state,
                iterations: inner.iteration,
                duration: inner.started_at.map(|t| t.elapsed()).unwrap_or_default(),
                error: outcome.error,
                files_changed: inner.files.paths(),
            };
            inner.state = result.state;
            inner.result = Some(result.clone());
            (result, inner.emitting)
        };

        match &result.error {
            Some(err) if result.state != LoopState::Cancelled => info!(
                "Loop {} after {} iteration(s) in {:?}: {}",
                result.state, result.iterations, result.duration, err
            ),
            _ => info!(
                "Loop {} after {} iteration(s) in {:?}",
                result.state, result.iterations, result.duration
            ),
        }

        if emitting {
            let grace = Instant::now() + CLOSING_EMIT_GRACE;
            if result.state == LoopState::Cancelled {
                self.emit(Event::loop_cancelled(result.iterations), cancel, grace)
                    .await;
            } else {
                if let Some(err) = &result.error {
                    self.emit(Event::error(result.iterations, err.to_string()), cancel, grace)
                        .await;
                }
                self.emit(Event::loop_completed(result.clone()), cancel, grace)
                    .await;
            }
        }
        self.events.close().await;

        if let Err(e) = self.client.destroy_session().await {
            warn!("Failed to destroy session: {}", e);
        }
        result
    }
}

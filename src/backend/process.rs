//! Process backend - runs an agent CLI once per prompt.
//!
//! Arguments may contain `{prompt}` and `{model}` placeholders. When no
//! argument takes the prompt it is written to the child's stdin instead.
//! Stdout lines that parse as a `BackendEvent` JSON object are forwarded as
//! such; anything else is plain response text. A clean exit completes the
//! response, a failed exit becomes an error carrying stderr.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{RalphError, Result};

use super::{Backend, BackendEvent, SessionOptions};

pub const PROMPT_PLACEHOLDER: &str = "{prompt}";
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Backend that shells out to an agent command
#[derive(Debug)]
pub struct ProcessBackend {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    model: String,
    started: AtomicBool,
    next_session: AtomicUsize,
    sessions: Mutex<HashMap<String, SessionOptions>>,
}

impl ProcessBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>, model: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
            model: model.into(),
            started: AtomicBool::new(false),
            next_session: AtomicUsize::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Add an environment variable for the child process
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionOptions>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn takes_prompt_arg(&self) -> bool {
        self.args.iter().any(|a| a.contains(PROMPT_PLACEHOLDER))
    }

    fn build_command(&self, options: &SessionOptions, prompt: &str) -> Command {
        let model = if options.model.is_empty() {
            &self.model
        } else {
            &options.model
        };

        let mut cmd = Command::new(&self.command);
        for arg in &self.args {
            cmd.arg(arg.replace(PROMPT_PLACEHOLDER, prompt).replace(MODEL_PLACEHOLDER, model));
        }
        if !options.working_dir.as_os_str().is_empty() {
            cmd.current_dir(&options.working_dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let stdin = if self.takes_prompt_arg() {
            Stdio::null()
        } else {
            Stdio::piped()
        };
        cmd.stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Each run is a fresh process, so the system message rides along with every prompt
fn compose_prompt(options: &SessionOptions, prompt: &str) -> String {
    match &options.system_message {
        Some(system) if !system.content.trim().is_empty() => {
            format!("{}\n\n{}", system.content.trim(), prompt)
        }
        _ => prompt.to_string(),
    }
}

/// Parse one stdout line
pub fn parse_line(line: &str) -> BackendEvent {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(event) = serde_json::from_str::<BackendEvent>(trimmed) {
            return event;
        }
    }
    BackendEvent::text(format!("{}\n", line))
}

#[async_trait]
impl Backend for ProcessBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn start(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(RalphError::Config("backend command cannot be empty".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        info!("Process backend ready: {} {:?}", self.command, self.args);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        self.sessions().clear();
        Ok(())
    }

    async fn create_session(&self, options: &SessionOptions) -> Result<String> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(RalphError::Session("process backend not started".to_string()));
        }
        let n = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = format!("process-{}", n);
        self.sessions().insert(handle.clone(), options.clone());
        Ok(handle)
    }

    async fn destroy_session(&self, handle: &str) -> Result<()> {
        self.sessions().remove(handle);
        Ok(())
    }

    async fn send(
        &self,
        handle: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<BackendEvent>> {
        let options = self
            .sessions()
            .get(handle)
            .cloned()
            .ok_or_else(|| RalphError::fatal_transport(format!("unknown session: {}", handle)))?;

        let prompt = compose_prompt(&options, prompt);
        let mut child = self.build_command(&options, &prompt).spawn().map_err(|e| {
            RalphError::fatal_transport(format!("failed to spawn '{}': {}", self.command, e))
        })?;
        debug!("ProcessBackend::send: spawned '{}' (pid {:?})", self.command, child.id());

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!("ProcessBackend: failed writing prompt to stdin: {}", e);
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RalphError::fatal_transport("child stdout was not captured"))?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump(child, stdout, stderr, tx, cancel, self.command.clone()));
        Ok(rx)
    }
}

async fn pump(
    mut child: Child,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    tx: mpsc::Sender<BackendEvent>,
    cancel: CancellationToken,
    program: String,
) {
    let stderr_task = stderr.map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    });

    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("ProcessBackend: cancelled, killing '{}'", program);
                let _ = child.kill().await;
                return;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                // Agents may print bytes that are not UTF-8; keep the rest of the line
                let line = String::from_utf8_lossy(&buf);
                let event = parse_line(line.trim_end_matches(|c| c == '\n' || c == '\r'));
                let is_final = event.is_final();
                if tx.send(event).await.is_err() {
                    let _ = child.kill().await;
                    return;
                }
                if is_final {
                    return;
                }
            }
            Err(e) => {
                let _ = tx
                    .send(BackendEvent::error(format!("failed reading output of '{}': {}", program, e)))
                    .await;
                let _ = child.kill().await;
                return;
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return;
        }
        status = child.wait() => status,
    };
    let stderr_text = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    let event = match status {
        Ok(status) if status.success() => BackendEvent::complete(),
        Ok(status) => {
            warn!("'{}' exited with {}", program, status);
            BackendEvent::error(format!("'{}' exited with {}: {}", program, status, stderr_text.trim()))
        }
        Err(e) => BackendEvent::error(format!("failed waiting for '{}': {}", program, e)),
    };
    let _ = tx.send(event).await;
}

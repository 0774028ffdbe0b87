//! A running server process and its framed channel.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::codec::{FrameReader, FrameWriter};
use super::profile::LaunchProfile;
use crate::error::{BootstrapError, Result};

/// Request id used for the startup `initialize` request.
pub const INITIALIZE_ID: &str = "luat-bootstrap/initialize";

/// Request id used for the `shutdown` request sent by [`ServerSession::stop`].
pub const SHUTDOWN_ID: &str = "luat-bootstrap/shutdown";

/// Tracing target the server's stderr is re-emitted under.
pub const STDERR_TARGET: &str = "luat_lsp::stderr";

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Server messages buffered for the host before new ones are dropped.
pub const INCOMING_CAPACITY: usize = 1024;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Starting,
    Running,
    Restarting,
    Stopped,
    Crashed,
}

impl SessionState {
    /// True once the process is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// How the server process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    pub description: String,
}

impl ExitReport {
    fn from_wait(waited: std::io::Result<ExitStatus>) -> Self {
        match waited {
            Ok(status) => Self {
                code: status.code(),
                description: status.to_string(),
            },
            Err(e) => Self {
                code: None,
                description: format!("exit status unavailable: {}", e),
            },
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Notifications from a session's monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The process exited without being asked to.
    Crashed {
        path: PathBuf,
        pid: Option<u32>,
        exit: ExitReport,
    },
}

/// Everything needed to launch one session.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub path: PathBuf,
    pub profile: LaunchProfile,
    /// Params of the `initialize` request, passed through untouched.
    pub initialize_params: Value,
    pub handshake_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl LaunchSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            profile: LaunchProfile::Default,
            initialize_params: json!({}),
            handshake_timeout: Duration::from_secs(20),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

enum WriterCommand {
    Send(Value),
    Close,
}

type Waiters = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// A started server.
///
/// The child process is owned by a monitor task; the session talks to it
/// through the writer task and observes it through watch channels. Dropping
/// the session kills the process.
pub struct ServerSession {
    path: PathBuf,
    profile: LaunchProfile,
    pid: Option<u32>,
    writer_tx: mpsc::Sender<WriterCommand>,
    incoming: Option<mpsc::Receiver<Value>>,
    waiters: Waiters,
    state: Arc<watch::Sender<SessionState>>,
    exit: watch::Receiver<Option<ExitReport>>,
    stop_requested: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    initialize_result: Value,
    shutdown_timeout: Duration,
}

impl ServerSession {
    /// Spawn the server and complete the `initialize` handshake.
    ///
    /// Crashes after this returns are reported on `events`.
    pub async fn start(
        spec: &LaunchSpec,
        events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    ) -> Result<Self> {
        info!(
            "Starting luat-lsp from {} ({} profile)",
            spec.path.display(),
            spec.profile
        );
        let start_failed = |message: String| BootstrapError::StartFailed {
            path: spec.path.clone(),
            message,
        };

        let mut command = Command::new(&spec.path);
        command
            .envs(spec.profile.env().iter().copied())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| start_failed(e.to_string()))?;
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| start_failed("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| start_failed("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| start_failed("stderr was not captured".to_string()))?;

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Send(message) => {
                        if let Err(e) = writer.send(&message).await {
                            warn!("luat-lsp write error: {}", e);
                            return;
                        }
                    }
                    WriterCommand::Close => break,
                }
            }
            let _ = writer.close().await;
        });

        let waiters: Waiters = Arc::default();
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let reader_waiters = waiters.clone();
        tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            let mut dropped = 0usize;
            loop {
                match reader.next_message().await {
                    Ok(Some(message)) => {
                        if let Some(waiter) = take_waiter(&reader_waiters, &message) {
                            let _ = waiter.send(message);
                            continue;
                        }
                        match incoming_tx.try_send(message) {
                            Ok(()) if dropped > 0 => {
                                debug!("Dropped {} server messages", dropped);
                                dropped = 0;
                            }
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                if dropped == 0 {
                                    warn!(
                                        "Server message buffer full ({} messages); dropping",
                                        INCOMING_CAPACITY
                                    );
                                }
                                dropped += 1;
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!("Dropping server message: no receiver");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("luat-lsp closed its stdout");
                        break;
                    }
                    Err(e) => {
                        warn!("luat-lsp channel error: {}", e);
                        break;
                    }
                }
            }
            if let Ok(mut waiters) = reader_waiters.lock() {
                waiters.clear();
            }
        });

        tokio::spawn(async move {
            let mut stderr = BufReader::new(stderr);
            let mut line = Vec::new();
            loop {
                line.clear();
                match stderr.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        info!(target: STDERR_TARGET, "{}", text.trim_end());
                    }
                    Err(e) => {
                        debug!("luat-lsp stderr closed: {}", e);
                        break;
                    }
                }
            }
        });

        let (state_tx, _) = watch::channel(SessionState::Starting);
        let state = Arc::new(state_tx);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let stop_requested = Arc::new(AtomicBool::new(false));

        let monitor_state = state.clone();
        let monitor_stop = stop_requested.clone();
        let monitor_path = spec.path.clone();
        let monitor_pid = pid;
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let waited = match waited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        debug!("Kill failed: {}", e);
                    }
                    child.wait().await
                }
            };

            let exit = ExitReport::from_wait(waited);
            let _ = exit_tx.send(Some(exit.clone()));
            if monitor_stop.load(Ordering::SeqCst) {
                debug!("luat-lsp exited: {}", exit);
                monitor_state.send_replace(SessionState::Stopped);
                return;
            }

            // An exit during the handshake surfaces as a start error instead.
            let previous = monitor_state.send_replace(SessionState::Crashed);
            if previous != SessionState::Running {
                debug!("luat-lsp exited while {}: {}", previous, exit);
                return;
            }
            warn!("luat-lsp exited unexpectedly: {}", exit);
            if let Some(events) = &events {
                let _ = events.send(SupervisorEvent::Crashed {
                    path: monitor_path,
                    pid: monitor_pid,
                    exit,
                });
            }
        });

        let mut session = Self {
            path: spec.path.clone(),
            profile: spec.profile,
            pid,
            writer_tx,
            incoming: Some(incoming_rx),
            waiters,
            state,
            exit: exit_rx,
            stop_requested,
            kill_tx: Some(kill_tx),
            initialize_result: Value::Null,
            shutdown_timeout: spec.shutdown_timeout,
        };

        match session.handshake(spec).await {
            Ok(result) => {
                session.initialize_result = result;
                session.set_state(SessionState::Running);
                info!("luat-lsp running (pid {:?})", session.pid);
                Ok(session)
            }
            Err(e) => {
                warn!("luat-lsp handshake failed: {}", e);
                session.stop_requested.store(true, Ordering::SeqCst);
                session.kill().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, spec: &LaunchSpec) -> Result<Value> {
        let response = self
            .request(
                INITIALIZE_ID,
                "initialize",
                spec.initialize_params.clone(),
                spec.handshake_timeout,
            )
            .await
            .map_err(|message| BootstrapError::Handshake { message })?;

        if let Some(error) = response.get("error") {
            return Err(BootstrapError::Handshake {
                message: format!("server rejected initialize: {}", error),
            });
        }

        self.write(json!({"jsonrpc": "2.0", "method": "initialized", "params": {}}))
            .await
            .map_err(initialized_failed)?;
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send a request under a reserved id and wait for its response.
    async fn request(
        &self,
        id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> std::result::Result<Value, String> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .map_err(|_| "response table poisoned".to_string())?
            .insert(id.to_string(), tx);

        self.write(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await
            .map_err(|e| e.to_string())?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(format!("server closed its output before answering {}", method)),
            Err(_) => Err(format!("no response to {} within {:?}", method, timeout)),
        }
    }

    async fn write(&self, message: Value) -> Result<()> {
        self.writer_tx
            .send(WriterCommand::Send(message))
            .await
            .map_err(|_| BootstrapError::Channel {
                message: "server input is closed".to_string(),
            })
    }

    /// Send a message to the server.
    ///
    /// Fails unless the session is running.
    pub async fn send(&self, message: Value) -> Result<()> {
        let state = self.state();
        if state != SessionState::Running {
            return Err(BootstrapError::Channel {
                message: format!("session is {}", state),
            });
        }
        self.write(message).await
    }

    /// Take the stream of messages from the server.
    ///
    /// Only the first call returns a receiver. At most [`INCOMING_CAPACITY`]
    /// messages are held for a receiver that is not being read; later ones
    /// are dropped.
    pub fn take_incoming(&mut self) -> Option<mpsc::Receiver<Value>> {
        self.incoming.take()
    }

    /// Stop the server: `shutdown`, `exit`, close input, then kill if it
    /// lingers. Calling this on a stopped or crashed session does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        if self.exit.borrow().is_some() {
            self.set_state(SessionState::Stopped);
            return Ok(());
        }

        info!("Stopping luat-lsp (pid {:?})", self.pid);
        match self
            .request(SHUTDOWN_ID, "shutdown", Value::Null, self.shutdown_timeout)
            .await
        {
            Ok(_) => debug!("luat-lsp acknowledged shutdown"),
            Err(reason) => warn!("Graceful shutdown failed: {}", reason),
        }
        let _ = self.write(json!({"jsonrpc": "2.0", "method": "exit"})).await;
        let _ = self.writer_tx.send(WriterCommand::Close).await;

        let exited = tokio::time::timeout(self.shutdown_timeout, self.wait_for_exit()).await;
        if exited.is_err() {
            warn!(
                "luat-lsp still running {:?} after exit; killing it",
                self.shutdown_timeout
            );
            self.kill().await;
        }

        self.set_state(SessionState::Stopped);
        info!("luat-lsp stopped");
        Ok(())
    }

    async fn kill(&mut self) {
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }
        self.wait_for_exit().await;
    }

    /// Wait until the process has exited.
    pub async fn wait_for_exit(&self) -> Option<ExitReport> {
        let mut exit = self.exit.clone();
        exit.wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|report| report.clone())
    }

    /// How the process ended, once it has.
    pub fn exit_report(&self) -> Option<ExitReport> {
        self.exit.borrow().clone()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session {} -> {}", previous, state);
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Executable this session was started from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self) -> LaunchProfile {
        self.profile
    }

    /// Process id, while the process is alive.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// `result` of the server's `initialize` response.
    pub fn initialize_result(&self) -> &Value {
        &self.initialize_result
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        // Dropping kill_tx makes the monitor kill the child.
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("path", &self.path)
            .field("profile", &self.profile)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

/// A lost `initialized` notification fails the handshake, not the channel.
fn initialized_failed(error: BootstrapError) -> BootstrapError {
    BootstrapError::Handshake {
        message: format!("could not send initialized: {}", error),
    }
}

/// Claim the waiter for a response to one of our reserved-id requests.
fn take_waiter(waiters: &Waiters, message: &Value) -> Option<oneshot::Sender<Value>> {
    if message.get("method").is_some() {
        return None;
    }
    let id = message.get("id")?.as_str()?;
    waiters.lock().ok()?.remove(id)
}

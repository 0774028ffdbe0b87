//! Client supervisor: start, stop and restart server sessions.

pub mod codec;
pub mod profile;
pub mod session;

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::info;

pub use codec::{FrameReader, FrameWriter};
pub use profile::LaunchProfile;
pub use session::{
    ExitReport, INCOMING_CAPACITY, INITIALIZE_ID, LaunchSpec, SHUTDOWN_ID, STDERR_TARGET,
    ServerSession, SessionState, SupervisorEvent,
};

use crate::config::SupervisorSection;
use crate::error::Result;

/// Launches sessions with shared timeouts and a shared crash channel.
#[derive(Debug, Clone)]
pub struct ClientSupervisor {
    handshake_timeout: Duration,
    shutdown_timeout: Duration,
    initialize_params: Value,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl ClientSupervisor {
    /// Create a supervisor and the receiver its crash events arrive on.
    pub fn new(config: &SupervisorSection) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            handshake_timeout: config.handshake_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            initialize_params: json!({}),
            events,
        };
        (supervisor, events_rx)
    }

    /// Params sent with every `initialize` request.
    pub fn with_initialize_params(mut self, params: Value) -> Self {
        self.initialize_params = params;
        self
    }

    /// Launch the server at `path` and complete its handshake.
    pub async fn start(&self, path: &Path, profile: LaunchProfile) -> Result<ServerSession> {
        let spec = LaunchSpec {
            path: path.to_path_buf(),
            profile,
            initialize_params: self.initialize_params.clone(),
            handshake_timeout: self.handshake_timeout,
            shutdown_timeout: self.shutdown_timeout,
        };
        ServerSession::start(&spec, Some(self.events.clone())).await
    }

    /// Stop a session. Stopping twice is a no-op.
    pub async fn stop(&self, session: &mut ServerSession) -> Result<()> {
        session.stop().await
    }

    /// Stop `session` and start a new one from the same path and profile.
    pub async fn restart(&self, mut session: ServerSession) -> Result<ServerSession> {
        info!("Restarting luat-lsp from {}", session.path().display());
        session.set_state(SessionState::Restarting);
        session.stop().await?;

        let path = session.path().to_path_buf();
        let profile = session.profile();
        drop(session);
        self.start(&path, profile).await
    }
}

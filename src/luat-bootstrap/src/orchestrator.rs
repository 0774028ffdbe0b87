//! Acquisition orchestrator.
//!
//! Sequences locate, prompt, fetch, install and launch, and exposes the
//! user commands (`restart`, `download`) a host binds to its UI. The
//! current session is held here and nowhere else.
//!
//! Acquisitions are single-flight: a second trigger waits for the first and
//! then runs its own lookup, which finds whatever the first one installed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use crate::installer::{ArtifactInstaller, InstallProgress, InstalledServer, ProgressCallback};
use crate::locator::{CandidateSource, LocateReport, LocatorEnv, RejectedCandidate, ServerLocator};
use crate::release::ReleaseFetcher;
use crate::supervisor::{ClientSupervisor, ExitReport, ServerSession, SessionState, SupervisorEvent};
use crate::target::PlatformTarget;

/// What to do after the server crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashChoice {
    Restart,
    Ignore,
}

/// The host's side of the conversation with the user.
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Ask whether to download the server. `false` cancels without error.
    async fn confirm_download(&self) -> bool;

    /// Install progress.
    fn progress(&self, _event: InstallProgress) {}

    /// Show an error to the user.
    async fn report_error(&self, error: &BootstrapError);

    /// The running server exited on its own.
    async fn notify_crash(&self, path: &Path, exit: &ExitReport) -> CrashChoice;

    /// A candidate binary was found but skipped.
    async fn notify_rejected(&self, _rejected: &RejectedCandidate) {}
}

/// Result of a launch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A new session is running.
    Started {
        path: PathBuf,
        source: CandidateSource,
    },
    /// The existing session was restarted.
    Restarted { path: PathBuf },
    /// A session was already running.
    AlreadyRunning { path: PathBuf },
    /// The user declined the download.
    Declined,
}

/// Top-level acquisition and lifecycle controller.
pub struct Orchestrator {
    config: BootstrapConfig,
    env: LocatorEnv,
    target: Option<PlatformTarget>,
    fetcher: ReleaseFetcher,
    installer: Option<ArtifactInstaller>,
    supervisor: ClientSupervisor,
    ui: Arc<dyn UserInteraction>,
    session: Mutex<Option<ServerSession>>,
    sessions: watch::Sender<u64>,
    flight: Mutex<()>,
    events: std::sync::Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
}

impl Orchestrator {
    /// Create an orchestrator reading discovery inputs from the process
    /// environment.
    pub fn new(config: BootstrapConfig, ui: Arc<dyn UserInteraction>) -> Result<Self> {
        Self::with_env(config, LocatorEnv::from_process(), ui)
    }

    /// Create an orchestrator with explicit discovery inputs.
    pub fn with_env(
        config: BootstrapConfig,
        env: LocatorEnv,
        ui: Arc<dyn UserInteraction>,
    ) -> Result<Self> {
        let fetcher = ReleaseFetcher::new(&config.release)?;
        let installer = match config.install_dir() {
            Some(dir) => Some(ArtifactInstaller::new(dir, &config.release)?),
            None => None,
        };
        let (supervisor, events) = ClientSupervisor::new(&config.supervisor);

        Ok(Self {
            config,
            env,
            target: None,
            fetcher,
            installer,
            supervisor,
            ui,
            session: Mutex::new(None),
            sessions: watch::Sender::new(0),
            flight: Mutex::new(()),
            events: std::sync::Mutex::new(Some(events)),
        })
    }

    /// Install for `target` instead of the running platform.
    pub fn with_target(mut self, target: PlatformTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Params passed through in the server's `initialize` request.
    pub fn with_initialize_params(mut self, params: serde_json::Value) -> Self {
        self.supervisor = self.supervisor.with_initialize_params(params);
        self
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Private install directory, when one could be determined.
    pub fn install_dir(&self) -> Option<&Path> {
        self.installer.as_ref().map(|i| i.install_dir())
    }

    fn locator(&self) -> ServerLocator {
        ServerLocator::new(
            self.config.server.path.clone(),
            self.install_dir().map(Path::to_path_buf),
            self.env.clone(),
        )
    }

    /// Look for an installed server without starting anything.
    pub async fn locate(&self) -> LocateReport {
        self.locator().locate().await
    }

    /// Make sure a server is running, downloading one if the user agrees.
    pub async fn ensure_started(&self) -> Result<LaunchOutcome> {
        let _flight = self.flight.lock().await;
        let result = self.launch(None).await;
        self.surface(result).await
    }

    /// User command: restart the current session, or start one.
    pub async fn restart_server(&self) -> Result<LaunchOutcome> {
        let _flight = self.flight.lock().await;
        let current = self.session.lock().await.take();

        let result = match current {
            Some(session) => {
                let path = session.path().to_path_buf();
                match self.supervisor.restart(session).await {
                    Ok(session) => {
                        self.replace_session(session).await;
                        Ok(LaunchOutcome::Restarted { path })
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                debug!("No session to restart; starting one");
                self.launch(None).await
            }
        };
        self.surface(result).await
    }

    /// User command: download and install the latest server, then launch
    /// it through the normal lookup. Does not prompt.
    pub async fn download_server(&self) -> Result<LaunchOutcome> {
        let _flight = self.flight.lock().await;
        let result = async {
            let installed = self.acquire().await?;
            if let Some(mut session) = self.session.lock().await.take() {
                session.stop().await?;
            }
            self.launch(Some(installed.path)).await
        }
        .await;
        self.surface(result).await
    }

    /// Stop the current session, if any.
    pub async fn stop(&self) -> Result<()> {
        let _flight = self.flight.lock().await;
        if let Some(mut session) = self.session.lock().await.take() {
            session.stop().await?;
        }
        Ok(())
    }

    /// State of the current session.
    pub async fn state(&self) -> SessionState {
        match self.session.lock().await.as_ref() {
            Some(session) => session.state(),
            None => SessionState::Uninitialized,
        }
    }

    /// Access the current session, to exchange messages with the server.
    pub async fn session(&self) -> MutexGuard<'_, Option<ServerSession>> {
        self.session.lock().await
    }

    /// Watch for new sessions.
    ///
    /// The value changes each time a session is started or restarted, so a
    /// host can take the new session's incoming messages.
    pub fn subscribe_sessions(&self) -> watch::Receiver<u64> {
        self.sessions.subscribe()
    }

    async fn replace_session(&self, session: ServerSession) {
        *self.session.lock().await = Some(session);
        self.sessions.send_modify(|generation| *generation += 1);
    }

    /// Whether a crash event belongs to the session held now.
    async fn is_current_crash(&self, pid: Option<u32>) -> bool {
        match self.session.lock().await.as_ref() {
            Some(session) => session.pid() == pid && session.state() == SessionState::Crashed,
            None => false,
        }
    }

    /// Forward crashes to the user and restart on request.
    ///
    /// Returns `None` if the watcher is already running.
    pub fn spawn_crash_watcher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.events.lock().ok()?.take()?;
        let this = Arc::clone(self);

        Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let SupervisorEvent::Crashed { path, pid, exit } = event;
                if !this.is_current_crash(pid).await {
                    debug!("Ignoring crash of replaced session (pid {:?})", pid);
                    continue;
                }
                warn!("luat-lsp at {} crashed: {}", path.display(), exit);
                if this.ui.notify_crash(&path, &exit).await == CrashChoice::Restart {
                    let _ = this.restart_server().await;
                }
            }
        }))
    }

    /// Locate and start, acquiring first when nothing is found.
    ///
    /// After an install the lookup runs again, so the started server is
    /// always the one the locator picks. `installed` is the binary a
    /// previous install put in place, if any.
    async fn launch(&self, mut installed: Option<PathBuf>) -> Result<LaunchOutcome> {
        loop {
            {
                let mut current = self.session.lock().await;
                let existing = current
                    .as_ref()
                    .map(|s| (s.state().is_terminal(), s.path().to_path_buf()));
                match existing {
                    Some((false, path)) => return Ok(LaunchOutcome::AlreadyRunning { path }),
                    Some((true, _)) => *current = None,
                    None => {}
                }
            }

            let report = self.locate().await;
            for rejected in &report.rejected {
                self.ui.notify_rejected(rejected).await;
            }

            if let Some(found) = report.found {
                info!("Using luat-lsp from {} ({})", found.path.display(), found.source);
                let session = self
                    .supervisor
                    .start(&found.path, self.config.server.profile)
                    .await?;
                self.replace_session(session).await;
                return Ok(LaunchOutcome::Started {
                    path: found.path,
                    source: found.source,
                });
            }

            if let Some(path) = installed {
                return Err(BootstrapError::CorruptInstall {
                    path,
                    reason: "the installed server was not found by the next lookup".to_string(),
                });
            }

            if !self.ui.confirm_download().await {
                info!("Server download declined");
                return Ok(LaunchOutcome::Declined);
            }

            installed = Some(self.acquire().await?.path);
        }
    }

    /// Resolve, fetch and install on a detached task.
    ///
    /// The task runs to completion even if the caller stops waiting.
    async fn acquire(&self) -> Result<InstalledServer> {
        let target = match self.target {
            Some(target) => target,
            None => PlatformTarget::current()?,
        };
        let installer = self.installer.clone().ok_or_else(|| BootstrapError::InstallDir {
            path: PathBuf::new(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no local data directory; set [install] dir",
            ),
        })?;
        let fetcher = self.fetcher.clone();
        let ui = Arc::clone(&self.ui);

        info!("Acquiring luat-lsp for {}", target);
        let task = tokio::spawn(async move {
            ui.progress(InstallProgress::Fetching);
            let selected = fetcher.fetch_latest_matching_asset(&target).await?;

            let sink = Arc::clone(&ui);
            let progress: ProgressCallback = Arc::new(move |event| sink.progress(event));
            installer.install(&selected, Some(progress)).await
        });

        task.await.map_err(|e| {
            BootstrapError::Io(std::io::Error::other(format!("install task failed: {}", e)))
        })?
    }

    async fn surface<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!("{}", e);
            if e.is_user_actionable() {
                self.ui.report_error(e).await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::resolve;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Decline {
        prompts: AtomicUsize,
        errors: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UserInteraction for Decline {
        async fn confirm_download(&self) -> bool {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            false
        }

        async fn report_error(&self, error: &BootstrapError) {
            self.errors.lock().unwrap().push(error.to_string());
        }

        async fn notify_crash(&self, _path: &Path, _exit: &ExitReport) -> CrashChoice {
            CrashChoice::Ignore
        }
    }

    fn isolated(dir: &Path) -> (BootstrapConfig, LocatorEnv) {
        let mut config = BootstrapConfig::default();
        config.install.dir = Some(dir.join("server"));
        config.release.api_base = "http://127.0.0.1:9".to_string();
        let env = LocatorEnv {
            path: None,
            cargo_home: Some(dir.join("cargo")),
            home: None,
        };
        (config, env)
    }

    #[tokio::test]
    async fn test_decline_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let (config, env) = isolated(dir.path());
        let ui = Arc::new(Decline {
            prompts: AtomicUsize::new(0),
            errors: Default::default(),
        });

        let orchestrator = Orchestrator::with_env(config, env, ui.clone()).unwrap();
        let outcome = orchestrator.ensure_started().await.unwrap();

        assert_eq!(outcome, LaunchOutcome::Declined);
        assert_eq!(ui.prompts.load(Ordering::SeqCst), 1);
        assert!(ui.errors.lock().unwrap().is_empty());
        assert!(!dir.path().join("server").exists());
        assert_eq!(orchestrator.state().await, SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_unreachable_release_api_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let (config, env) = isolated(dir.path());
        let ui = Arc::new(Decline {
            prompts: AtomicUsize::new(0),
            errors: Default::default(),
        });

        let orchestrator = Orchestrator::with_env(config, env, ui.clone())
            .unwrap()
            .with_target(resolve("linux", "x86_64").unwrap());
        let err = orchestrator.download_server().await.unwrap_err();

        assert!(err.is_network_error());
        assert_eq!(ui.prompts.load(Ordering::SeqCst), 0);
        assert_eq!(ui.errors.lock().unwrap().len(), 1);
        assert!(!dir.path().join("server").exists());
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (config, env) = isolated(dir.path());
        let ui = Arc::new(Decline {
            prompts: AtomicUsize::new(0),
            errors: Default::default(),
        });

        let orchestrator = Orchestrator::with_env(config, env, ui).unwrap();
        orchestrator.stop().await.unwrap();
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_crash_without_session_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (config, env) = isolated(dir.path());
        let ui = Arc::new(Decline {
            prompts: AtomicUsize::new(0),
            errors: Default::default(),
        });

        let orchestrator = Orchestrator::with_env(config, env, ui).unwrap();
        assert!(!orchestrator.is_current_crash(Some(4242)).await);
        assert_eq!(*orchestrator.subscribe_sessions().borrow(), 0);
    }

    #[tokio::test]
    async fn test_crash_watcher_spawns_once() {
        let dir = tempfile::tempdir().unwrap();
        let (config, env) = isolated(dir.path());
        let ui = Arc::new(Decline {
            prompts: AtomicUsize::new(0),
            errors: Default::default(),
        });

        let orchestrator = Arc::new(Orchestrator::with_env(config, env, ui).unwrap());
        let watcher = orchestrator.spawn_crash_watcher();
        assert!(watcher.is_some());
        assert!(orchestrator.spawn_crash_watcher().is_none());
    }
}

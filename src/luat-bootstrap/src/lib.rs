//! luat-bootstrap - acquisition and lifecycle management for `luat-lsp`.
//!
//! Finds an installed language server, or downloads the build for the
//! current platform from the project's latest release, then runs it as a
//! supervised child process:
//! - Target resolution (OS/arch to release triple)
//! - Server lookup (config override, install directory, `PATH`, cargo bin)
//! - Release lookup and asset selection
//! - Download, extraction and install with a checksum manifest
//! - Session start, graceful stop, restart and crash detection
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use luat_bootstrap::{BootstrapConfig, Orchestrator};
//!
//! let orchestrator = Arc::new(Orchestrator::new(BootstrapConfig::load()?, ui)?);
//! orchestrator.spawn_crash_watcher();
//! orchestrator.ensure_started().await?;
//! ```

pub mod config;
pub mod error;
pub mod installer;
pub mod locator;
pub mod orchestrator;
pub mod release;
pub mod supervisor;
pub mod target;

pub use config::BootstrapConfig;
pub use error::{BootstrapError, ErrorKind, Result};
pub use installer::{ArtifactInstaller, InstallManifest, InstallProgress, InstalledServer};
pub use locator::{CandidateSource, LocateReport, LocatedServer, LocatorEnv, ServerLocator};
pub use orchestrator::{CrashChoice, LaunchOutcome, Orchestrator, UserInteraction};
pub use release::{ReleaseFetcher, SelectedAsset};
pub use supervisor::{
    ClientSupervisor, ExitReport, LaunchProfile, ServerSession, SessionState, SupervisorEvent,
};
pub use target::PlatformTarget;

/// Base name of the server executable.
pub const SERVER_BINARY: &str = "luat-lsp";

/// File name of the server executable on this platform.
pub fn server_file_name() -> &'static str {
    binary_file_name(cfg!(windows))
}

/// File name of the server executable, with the `.exe` suffix on Windows.
pub(crate) fn binary_file_name(windows: bool) -> &'static str {
    if windows {
        "luat-lsp.exe"
    } else {
        SERVER_BINARY
    }
}

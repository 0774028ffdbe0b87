//! Discovery of an already-installed server binary.
//!
//! Candidates are probed in a fixed order and the first existing file wins:
//! 1. the configured `server.path` override,
//! 2. the private install directory,
//! 3. each directory on `PATH`, in order,
//! 4. the cargo toolchain bin directory.
//!
//! Probing never creates anything. Only existence is checked, except for
//! the install directory, whose binary is also checked against the install
//! manifest when one is present.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::installer::manifest::InstallManifest;

/// Where a candidate path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    /// The `server.path` config option.
    ConfigOverride,
    /// The bootstrapper's private install directory.
    InstallCache,
    /// A directory on the process search path.
    SearchPath,
    /// The cargo toolchain bin directory.
    Toolchain,
}

impl CandidateSource {
    /// Short description for messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::ConfigOverride => "configured server.path",
            Self::InstallCache => "install directory",
            Self::SearchPath => "PATH",
            Self::Toolchain => "cargo bin directory",
        }
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Environment inputs used for discovery, captured once.
#[derive(Debug, Clone, Default)]
pub struct LocatorEnv {
    /// Value of `PATH`.
    pub path: Option<OsString>,
    /// Value of `CARGO_HOME`.
    pub cargo_home: Option<PathBuf>,
    /// The user's home directory.
    pub home: Option<PathBuf>,
}

impl LocatorEnv {
    /// Capture the inputs from the running process.
    pub fn from_process() -> Self {
        Self {
            path: std::env::var_os("PATH"),
            cargo_home: std::env::var_os("CARGO_HOME").map(PathBuf::from),
            home: dirs::home_dir(),
        }
    }

    /// Cargo bin directory: `$CARGO_HOME/bin`, else `~/.cargo/bin`.
    pub fn toolchain_bin_dir(&self) -> Option<PathBuf> {
        self.cargo_home
            .clone()
            .or_else(|| self.home.as_ref().map(|h| h.join(".cargo")))
            .map(|d| d.join("bin"))
    }
}

/// A server binary found by [`ServerLocator::locate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedServer {
    pub path: PathBuf,
    pub source: CandidateSource,
    /// Manifest of the install, for install-directory hits.
    pub manifest: Option<InstallManifest>,
}

/// A candidate that existed but was not usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub path: PathBuf,
    pub source: CandidateSource,
    pub reason: String,
}

/// Outcome of a lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocateReport {
    pub found: Option<LocatedServer>,
    pub rejected: Vec<RejectedCandidate>,
}

impl LocateReport {
    /// Path of the located server, if any.
    pub fn path(&self) -> Option<&Path> {
        self.found.as_ref().map(|f| f.path.as_path())
    }
}

/// Searches the candidate locations for a usable server binary.
#[derive(Debug, Clone)]
pub struct ServerLocator {
    override_path: Option<PathBuf>,
    install_dir: Option<PathBuf>,
    env: LocatorEnv,
    file_name: String,
}

impl ServerLocator {
    /// Create a locator.
    pub fn new(
        override_path: Option<PathBuf>,
        install_dir: Option<PathBuf>,
        env: LocatorEnv,
    ) -> Self {
        Self {
            override_path,
            install_dir,
            env,
            file_name: crate::server_file_name().to_string(),
        }
    }

    /// Use a different binary file name (tests, renamed builds).
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Binary file name the locator looks for.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Canonical binary path inside the install directory.
    pub fn install_path(&self) -> Option<PathBuf> {
        self.install_dir.as_ref().map(|d| d.join(&self.file_name))
    }

    /// All candidate paths in precedence order.
    pub fn candidates(&self) -> Vec<(CandidateSource, PathBuf)> {
        let mut candidates = Vec::new();

        if let Some(path) = &self.override_path {
            candidates.push((CandidateSource::ConfigOverride, path.clone()));
        }

        if let Some(path) = self.install_path() {
            candidates.push((CandidateSource::InstallCache, path));
        }

        if let Some(search_path) = &self.env.path {
            for dir in std::env::split_paths(search_path) {
                if dir.as_os_str().is_empty() {
                    continue;
                }
                candidates.push((CandidateSource::SearchPath, dir.join(&self.file_name)));
            }
        }

        if let Some(dir) = self.env.toolchain_bin_dir() {
            candidates.push((CandidateSource::Toolchain, dir.join(&self.file_name)));
        }

        candidates
    }

    /// Find the first existing candidate.
    pub async fn locate(&self) -> LocateReport {
        let mut report = LocateReport::default();

        for (source, path) in self.candidates() {
            if !is_existing_file(&path).await {
                debug!("No server at {} ({})", path.display(), source);
                continue;
            }

            let manifest = if source == CandidateSource::InstallCache {
                match self.check_install(&path).await {
                    Ok(manifest) => manifest,
                    Err(reason) => {
                        warn!("Skipping corrupt install at {}: {}", path.display(), reason);
                        report.rejected.push(RejectedCandidate {
                            path,
                            source,
                            reason,
                        });
                        continue;
                    }
                }
            } else {
                None
            };

            debug!("Located server at {} ({})", path.display(), source);
            report.found = Some(LocatedServer {
                path,
                source,
                manifest,
            });
            break;
        }

        report
    }

    /// Validate an install-directory binary against its manifest.
    async fn check_install(
        &self,
        binary: &Path,
    ) -> std::result::Result<Option<InstallManifest>, String> {
        let Some(dir) = binary.parent() else {
            return Ok(None);
        };

        let manifest = InstallManifest::load(dir)
            .await
            .map_err(|e| format!("unreadable install manifest: {}", e))?;

        if let Some(manifest) = &manifest {
            manifest.verify(binary).await.map_err(|e| e.to_string())?;
        }

        Ok(manifest)
    }
}

async fn is_existing_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}

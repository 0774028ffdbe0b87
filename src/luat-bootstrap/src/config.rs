//! Bootstrap configuration.
//!
//! Loaded from `<config_dir>/luat/bootstrap.toml`. Every field has a
//! default, so an absent file or an absent section is not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, Result};
use crate::supervisor::LaunchProfile;

/// Default release project on the hosting service.
pub const DEFAULT_PROJECT: &str = "maravilla-labs/luat";

/// Default release API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default cap on redirect hops while downloading an asset.
pub const DEFAULT_MAX_REDIRECTS: usize = 8;

/// Server discovery and launch options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Explicit server binary, bypassing discovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Launch profile used when starting the server.
    pub profile: LaunchProfile,
}

/// Install location options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSection {
    /// Override of the private install directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Release hosting options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseSection {
    /// `owner/repo` of the release project.
    pub project: String,
    /// Base URL of the release API.
    pub api_base: String,
    /// Maximum redirect hops followed per download.
    pub max_redirects: usize,
    /// Accept `http://` redirect targets (testing and mirrors only).
    pub allow_insecure_redirects: bool,
    /// Timeout for each HTTP request in seconds.
    pub timeout_secs: u64,
}

impl Default for ReleaseSection {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            allow_insecure_redirects: false,
            timeout_secs: 60,
        }
    }
}

impl ReleaseSection {
    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session supervision options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    /// How long to wait for the initialize response.
    pub handshake_timeout_secs: u64,
    /// How long to wait for a graceful shutdown before killing.
    pub shutdown_timeout_secs: u64,
}

impl SupervisorSection {
    /// Handshake timeout as a duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Shutdown timeout as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 20,
            shutdown_timeout_secs: 5,
        }
    }
}

/// User configuration for the bootstrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub server: ServerSection,
    pub install: InstallSection,
    pub release: ReleaseSection,
    pub supervisor: SupervisorSection,
}

impl BootstrapConfig {
    /// Standard config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("luat").join("bootstrap.toml"))
    }

    /// Load config from the standard location, falling back to defaults
    /// when no file exists.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load config from a specific file.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(BootstrapError::Config {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
            }
        };
        Self::from_toml(&content).map_err(|message| BootstrapError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Directory that holds the downloaded server.
    ///
    /// Defaults to `<data_local_dir>/luat/server`.
    pub fn install_dir(&self) -> Option<PathBuf> {
        self.install
            .dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("luat").join("server")))
    }
}

//! Error types for luat-bootstrap.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Errors that can occur while acquiring or supervising the server.
#[derive(Debug, Error)]
pub enum BootstrapError {
    // Platform errors
    #[error("Unsupported platform: no luat-lsp build is published for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    // Release errors
    #[error("Failed to fetch the latest release of {project}: {message}")]
    ReleaseFetch { project: String, message: String },

    #[error(
        "Release {tag} has no asset for target {target} \
         (looked for {prefix}.tar.gz or {prefix}.zip). \
         Please report this at https://github.com/maravilla-labs/luat/issues"
    )]
    AssetNotFound {
        tag: String,
        target: String,
        prefix: String,
    },

    // Install errors
    #[error("Cannot prepare install directory {}: {source}", path.display())]
    InstallDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("Failed to extract {}: {message}", archive.display())]
    Extraction { archive: PathBuf, message: String },

    #[error("Failed to mark {} executable: {source}", path.display())]
    Permission {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{cause} (leftover archive {} could not be removed: {cleanup})", leftover.display())]
    InstallIncomplete {
        cause: Box<BootstrapError>,
        leftover: PathBuf,
        cleanup: std::io::Error,
    },

    #[error("Failed to install luat-lsp at {}: {message}", path.display())]
    Finalize { path: PathBuf, message: String },

    #[error("Another luat-lsp install is already running in {}", dir.display())]
    InstallInProgress { dir: PathBuf },

    #[error("Installed server at {} is corrupt: {reason}", path.display())]
    CorruptInstall { path: PathBuf, reason: String },

    // Session errors
    #[error("Failed to start {}: {message}", path.display())]
    StartFailed { path: PathBuf, message: String },

    #[error("Server handshake failed: {message}")]
    Handshake { message: String },

    #[error("Server channel error: {message}")]
    Channel { message: String },

    // Config errors
    #[error("Invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    // File system errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error category, for hosts that branch on the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedPlatform,
    ReleaseFetch,
    AssetNotFound,
    InstallDir,
    Download,
    Extraction,
    Permission,
    InstallIncomplete,
    Finalize,
    InstallInProgress,
    CorruptInstall,
    StartFailed,
    Handshake,
    Channel,
    Config,
    Io,
    Json,
}

impl BootstrapError {
    /// Get the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedPlatform { .. } => ErrorKind::UnsupportedPlatform,
            Self::ReleaseFetch { .. } => ErrorKind::ReleaseFetch,
            Self::AssetNotFound { .. } => ErrorKind::AssetNotFound,
            Self::InstallDir { .. } => ErrorKind::InstallDir,
            Self::Download { .. } => ErrorKind::Download,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::InstallIncomplete { .. } => ErrorKind::InstallIncomplete,
            Self::Finalize { .. } => ErrorKind::Finalize,
            Self::InstallInProgress { .. } => ErrorKind::InstallInProgress,
            Self::CorruptInstall { .. } => ErrorKind::CorruptInstall,
            Self::StartFailed { .. } => ErrorKind::StartFailed,
            Self::Handshake { .. } => ErrorKind::Handshake,
            Self::Channel { .. } => ErrorKind::Channel,
            Self::Config { .. } => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    /// Check if this error should be shown to the user rather than only logged.
    pub fn is_user_actionable(&self) -> bool {
        !matches!(self, Self::Channel { .. } | Self::Json(_))
    }

    /// Check if this error came from the network.
    ///
    /// Network errors are never retried automatically; the user retries
    /// through the download command.
    pub fn is_network_error(&self) -> bool {
        match self {
            Self::ReleaseFetch { .. } | Self::Download { .. } => true,
            Self::InstallIncomplete { cause, .. } => cause.is_network_error(),
            _ => false,
        }
    }
}

//! Artifact installer.
//!
//! Turns a selected release asset into an executable server at the
//! canonical install path:
//!
//! 1. lock and create the install directory
//! 2. stream the asset to a temporary archive inside it
//! 3. extract into a private staging directory and move the binary into place
//! 4. mark it executable (Unix)
//! 5. record an [`InstallManifest`]
//!
//! The temporary archive is always removed once extraction has run, whether
//! or not later steps fail. If that removal itself fails after an earlier
//! error, the caller gets [`BootstrapError::InstallIncomplete`] carrying both.

pub mod archive;
pub mod download;
pub mod lock;
pub mod manifest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, warn};

pub use download::AssetDownloader;
pub use lock::InstallLock;
pub use manifest::{InstallManifest, calculate_sha256};

use crate::config::ReleaseSection;
use crate::error::{BootstrapError, Result};
use crate::release::SelectedAsset;
use crate::target::PlatformTarget;

/// Install progress, reported to the host while an install runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallProgress {
    /// Looking up the latest release.
    Fetching,
    /// Bytes received so far, with the total when known.
    Downloading { downloaded: u64, total: Option<u64> },
    /// Unpacking the archive.
    Extracting,
    /// Moving the binary into place and recording the manifest.
    Finalizing,
}

impl InstallProgress {
    /// Download percentage, when the total size is known.
    pub fn percentage(&self) -> Option<f32> {
        match self {
            Self::Downloading {
                downloaded,
                total: Some(total),
            } if *total > 0 => Some((*downloaded as f32 / *total as f32) * 100.0),
            _ => None,
        }
    }
}

/// Progress callback type.
pub type ProgressCallback = Arc<dyn Fn(InstallProgress) + Send + Sync>;

/// A completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledServer {
    pub path: PathBuf,
    pub manifest: InstallManifest,
}

/// Installs release assets into one directory.
#[derive(Clone)]
pub struct ArtifactInstaller {
    install_dir: PathBuf,
    downloader: AssetDownloader,
}

impl ArtifactInstaller {
    /// Create an installer writing into `install_dir`.
    pub fn new(install_dir: impl Into<PathBuf>, release: &ReleaseSection) -> Result<Self> {
        Ok(Self {
            install_dir: install_dir.into(),
            downloader: AssetDownloader::new(release)?,
        })
    }

    /// Directory the server is installed into.
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Canonical path of the installed binary for `target`.
    pub fn binary_path(&self, target: &PlatformTarget) -> PathBuf {
        self.install_dir.join(target.binary_file_name())
    }

    /// Download and install `selected`.
    pub async fn install(
        &self,
        selected: &SelectedAsset,
        progress: Option<ProgressCallback>,
    ) -> Result<InstalledServer> {
        let report = |event: InstallProgress| {
            if let Some(cb) = &progress {
                cb(event);
            }
        };

        let kind = selected.asset.archive_kind().ok_or_else(|| BootstrapError::Extraction {
            archive: PathBuf::from(&selected.asset.name),
            message: "unrecognised archive format".to_string(),
        })?;

        fs::create_dir_all(&self.install_dir)
            .await
            .map_err(|source| BootstrapError::InstallDir {
                path: self.install_dir.clone(),
                source,
            })?;
        let _lock = InstallLock::acquire(&self.install_dir)?;

        let archive = self.install_dir.join(format!("{}.part", selected.asset.name));
        let staging = self
            .install_dir
            .join(format!(".staging-{}", std::process::id()));

        info!(
            "Installing {} ({} for {}) into {}",
            selected.asset.name,
            selected.tag,
            selected.target,
            self.install_dir.display()
        );
        let downloaded = self
            .downloader
            .download_to(&selected.asset.download_url, &archive, |downloaded, total| {
                report(InstallProgress::Downloading { downloaded, total });
            })
            .await;
        if let Err(e) = downloaded {
            return Err(with_cleanup(e, &archive).await);
        }

        report(InstallProgress::Extracting);
        let _ = fs::remove_dir_all(&staging).await;
        let extracted = archive::extract(kind, &archive, &staging).await;

        match (extracted, remove_if_exists(&archive).await) {
            (Ok(()), Ok(())) => {}
            (Ok(()), Err(cleanup)) => {
                warn!(
                    "Could not remove temporary archive {}: {}",
                    archive.display(),
                    cleanup
                );
            }
            (Err(e), Ok(())) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e);
            }
            (Err(e), Err(cleanup)) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(BootstrapError::InstallIncomplete {
                    cause: Box::new(e),
                    leftover: archive,
                    cleanup,
                });
            }
        }

        report(InstallProgress::Finalizing);
        let result = self.finish(selected, &staging, &archive).await;
        if let Err(e) = fs::remove_dir_all(&staging).await {
            debug!("Could not remove staging dir {}: {}", staging.display(), e);
        }

        let installed = result?;
        info!("Installed luat-lsp {} at {}", selected.tag, installed.path.display());
        Ok(installed)
    }

    /// Move the extracted binary into place and record the manifest.
    async fn finish(
        &self,
        selected: &SelectedAsset,
        staging: &Path,
        archive: &Path,
    ) -> Result<InstalledServer> {
        let wanted = selected.target.binary_file_name();
        let extraction_failed = |message: String| BootstrapError::Extraction {
            archive: archive.to_path_buf(),
            message,
        };
        let staged = archive::find_file_recursive(staging, wanted)
            .await
            .map_err(|e| extraction_failed(format!("searching for {}: {}", wanted, e)))?
            .ok_or_else(|| extraction_failed(format!("archive does not contain {}", wanted)))?;

        make_executable(&staged).await?;
        let sha256 = calculate_sha256(&staged)
            .await
            .map_err(|e| finalize_error(&staged, e))?;

        let manifest_path = InstallManifest::path_in(&self.install_dir);
        InstallManifest::remove(&self.install_dir)
            .await
            .map_err(|e| finalize_error(&manifest_path, e))?;
        let binary = self.binary_path(&selected.target);
        fs::rename(&staged, &binary)
            .await
            .map_err(|e| finalize_error(&binary, e))?;

        let manifest = InstallManifest {
            tag: selected.tag.clone(),
            target: selected.target.triple().to_string(),
            asset: selected.asset.name.clone(),
            sha256,
            installed_at: Utc::now(),
        };
        manifest
            .save(&self.install_dir)
            .await
            .map_err(|e| finalize_error(&manifest_path, e))?;

        Ok(InstalledServer {
            path: binary,
            manifest,
        })
    }
}

fn finalize_error(path: &Path, cause: impl std::fmt::Display) -> BootstrapError {
    BootstrapError::Finalize {
        path: path.to_path_buf(),
        message: cause.to_string(),
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|source| BootstrapError::Permission {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove a partial archive after a failed step, folding a cleanup failure
/// into the returned error.
async fn with_cleanup(cause: BootstrapError, archive: &Path) -> BootstrapError {
    match remove_if_exists(archive).await {
        Ok(()) => cause,
        Err(cleanup) => BootstrapError::InstallIncomplete {
            cause: Box::new(cause),
            leftover: archive.to_path_buf(),
            cleanup,
        },
    }
}

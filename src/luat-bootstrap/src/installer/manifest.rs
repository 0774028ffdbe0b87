//! Install manifest written next to the downloaded server.
//!
//! Records which release produced the binary and its SHA-256, so a later
//! lookup can tell a complete install from a truncated or tampered one.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{BootstrapError, Result};

/// Manifest file name inside the install directory.
pub const MANIFEST_FILE: &str = "luat-lsp.manifest.json";

/// Record of a completed install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    /// Release tag the binary came from.
    pub tag: String,
    /// Target triple of the binary.
    pub target: String,
    /// Asset file name that was downloaded.
    pub asset: String,
    /// Hex SHA-256 of the installed binary.
    pub sha256: String,
    /// When the install finished.
    pub installed_at: DateTime<Utc>,
}

impl InstallManifest {
    /// Manifest path for an install directory.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Load the manifest from an install directory, if present.
    pub async fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(dir);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// Write the manifest into an install directory.
    ///
    /// Written to a sibling file first and renamed into place, so a reader
    /// never sees half a manifest.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        let path = Self::path_in(dir);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Remove the manifest from an install directory, if present.
    pub async fn remove(dir: &Path) -> Result<()> {
        match tokio::fs::remove_file(Self::path_in(dir)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check that `binary` still matches the recorded checksum.
    pub async fn verify(&self, binary: &Path) -> Result<()> {
        let actual = calculate_sha256(binary).await?;
        let expected = self.sha256.trim().to_lowercase();

        if actual != expected {
            return Err(BootstrapError::CorruptInstall {
                path: binary.to_path_buf(),
                reason: format!(
                    "SHA-256 mismatch for {} {}: expected {}, got {}",
                    self.tag, self.target, expected, actual
                ),
            });
        }

        Ok(())
    }
}

/// Calculate the hex SHA-256 of a file.
pub async fn calculate_sha256(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

//! Install directory lock.
//!
//! Two bootstrappers sharing an install directory (two editor windows, or
//! the editor plus the CLI) must not extract over each other. The lock is a
//! marker file created with `create_new`, so acquisition is atomic on every
//! platform, and it is removed when the guard drops.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::{BootstrapError, Result};

/// Lock file name inside the install directory.
pub const LOCK_FILE: &str = ".install.lock";

/// A lock older than this is assumed to belong to a crashed install.
pub const STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Held while an install writes into its directory.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    /// Take the lock for `dir`, which must already exist.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);

        match create_marker(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if !is_stale(&path) {
                    return Err(BootstrapError::InstallInProgress {
                        dir: dir.to_path_buf(),
                    });
                }
                warn!("Removing stale install lock {}", path.display());
                let _ = std::fs::remove_file(&path);
                create_marker(&path).map_err(|e| lock_error(dir, e))?;
            }
            Err(e) => return Err(lock_error(dir, e)),
        }

        debug!("Acquired install lock {}", path.display());
        Ok(Self { path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn create_marker(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_AFTER)
}

fn lock_error(dir: &Path, e: io::Error) -> BootstrapError {
    if e.kind() == io::ErrorKind::AlreadyExists {
        BootstrapError::InstallInProgress {
            dir: dir.to_path_buf(),
        }
    } else {
        BootstrapError::InstallDir {
            path: dir.to_path_buf(),
            source: e,
        }
    }
}

//! Archive extraction for downloaded release assets.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{BootstrapError, Result};
use crate::release::ArchiveKind;

/// Check that an archive entry stays inside `dest_dir` and return its
/// destination path.
pub fn validate_entry_path(
    dest_dir: &Path,
    entry_name: &str,
) -> std::result::Result<PathBuf, String> {
    if entry_name.contains('\0') {
        return Err("entry name contains a null byte".to_string());
    }

    let entry_path = Path::new(entry_name);
    if entry_path.is_absolute() {
        return Err(format!("absolute entry path: {}", entry_name));
    }

    for component in entry_path.components() {
        match component {
            Component::ParentDir => {
                return Err(format!("entry escapes the archive root: {}", entry_name));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("rooted entry path: {}", entry_name));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(dest_dir.join(entry_path))
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Extract `archive` of the given kind into `dest_dir`.
///
/// Runs on the blocking pool. Symlinks and special files are skipped.
pub async fn extract(kind: ArchiveKind, archive: &Path, dest_dir: &Path) -> Result<()> {
    let archive_path = archive.to_path_buf();
    let dest = dest_dir.to_path_buf();
    debug!("Extracting {} into {}", archive.display(), dest_dir.display());

    let outcome = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dest)?;
        match kind {
            ArchiveKind::TarGz => unpack_tar_gz(&archive_path, &dest),
            ArchiveKind::Zip => unpack_zip(&archive_path, &dest),
        }
    })
    .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BootstrapError::Extraction {
            archive: archive.to_path_buf(),
            message: e.to_string(),
        }),
        Err(join) => Err(BootstrapError::Extraction {
            archive: archive.to_path_buf(),
            message: format!("extraction task failed: {}", join),
        }),
    }
}

fn unpack_tar_gz(archive_path: &Path, dest_dir: &Path) -> io::Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_name = entry.path()?.to_string_lossy().into_owned();
        let outpath = validate_entry_path(dest_dir, &entry_name).map_err(invalid)?;

        match entry.header().entry_type() {
            tar::EntryType::Directory => std::fs::create_dir_all(&outpath)?,
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut outfile = std::fs::File::create(&outpath)?;
                io::copy(&mut entry, &mut outfile)?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Ok(mode) = entry.header().mode() {
                        let perms = std::fs::Permissions::from_mode(mode);
                        let _ = std::fs::set_permissions(&outpath, perms);
                    }
                }
            }
            tar::EntryType::Symlink | tar::EntryType::Link => {
                warn!("Skipping link entry in archive: {}", entry_name);
            }
            _ => {}
        }
    }

    Ok(())
}

fn unpack_zip(archive_path: &Path, dest_dir: &Path) -> io::Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| invalid(e.to_string()))?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| invalid(e.to_string()))?;
        let entry_name = file.name().to_string();
        let outpath = validate_entry_path(dest_dir, &entry_name).map_err(invalid)?;

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if file.unix_mode().is_some_and(|mode| mode & 0o170000 == 0o120000) {
            warn!("Skipping link entry in archive: {}", entry_name);
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = std::fs::File::create(&outpath)?;
        io::copy(&mut file, &mut outfile)?;
    }

    Ok(())
}

/// Find a file named `file_name` anywhere under `dir`.
pub async fn find_file_recursive(dir: &Path, file_name: &str) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut subdirs = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;

        if file_type.is_file() && entry.file_name() == file_name {
            return Ok(Some(path));
        }
        if file_type.is_dir() {
            subdirs.push(path);
        }
    }

    for subdir in subdirs {
        if let Some(found) = Box::pin(find_file_recursive(&subdir, file_name)).await? {
            return Ok(Some(found));
        }
    }

    Ok(None)
}

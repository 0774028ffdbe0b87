//! Release descriptor types.

use serde::{Deserialize, Serialize};

use crate::target::PlatformTarget;

/// The most recent published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,
}

/// One downloadable file of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

impl AssetDescriptor {
    /// Archive format implied by the asset name.
    pub fn archive_kind(&self) -> Option<ArchiveKind> {
        ArchiveKind::from_name(&self.name)
    }
}

/// Archive formats release assets are published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    /// Recognised suffixes, in the order they are checked.
    pub const ALL: [ArchiveKind; 2] = [ArchiveKind::TarGz, ArchiveKind::Zip];

    /// File name suffix of this format.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::TarGz => ".tar.gz",
            Self::Zip => ".zip",
        }
    }

    /// Detect the format from a file name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| name.ends_with(k.suffix()))
    }
}

/// An asset picked for a target, with the release it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedAsset {
    pub tag: String,
    pub target: PlatformTarget,
    pub asset: AssetDescriptor,
}

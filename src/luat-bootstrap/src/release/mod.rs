//! Release lookup against the release-hosting service.

pub mod fetcher;
pub mod http;
pub mod types;

pub use fetcher::{ReleaseFetcher, asset_prefix, select_asset};
pub use types::{ArchiveKind, AssetDescriptor, ReleaseDescriptor, SelectedAsset};

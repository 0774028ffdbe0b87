//! Latest-release lookup and asset selection.

use reqwest::Client;
use reqwest::redirect::Policy;
use tracing::{debug, info};

use super::http::create_http_client;
use super::types::{ArchiveKind, AssetDescriptor, ReleaseDescriptor, SelectedAsset};
use crate::SERVER_BINARY;
use crate::config::ReleaseSection;
use crate::error::{BootstrapError, Result};
use crate::target::PlatformTarget;

/// Client for the release-hosting API.
#[derive(Clone)]
pub struct ReleaseFetcher {
    client: Client,
    api_base: String,
    project: String,
}

impl ReleaseFetcher {
    /// Create a fetcher from release options.
    pub fn new(config: &ReleaseSection) -> Result<Self> {
        let client = create_http_client(config.timeout(), Policy::limited(config.max_redirects))
            .map_err(|message| BootstrapError::ReleaseFetch {
                project: config.project.clone(),
                message,
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            project: config.project.clone(),
        })
    }

    /// Release project identifier.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// URL of the latest-release endpoint.
    pub fn latest_release_url(&self) -> String {
        format!("{}/repos/{}/releases/latest", self.api_base, self.project)
    }

    /// Fetch the latest published release.
    pub async fn fetch_latest(&self) -> Result<ReleaseDescriptor> {
        let url = self.latest_release_url();
        debug!("Fetching latest release from {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| self.fetch_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.fetch_error(format!("release API returned HTTP {}", status)));
        }

        let release: ReleaseDescriptor = response
            .json()
            .await
            .map_err(|e| self.fetch_error(format!("invalid release JSON: {}", e)))?;

        info!(
            "Latest {} release is {} ({} assets)",
            self.project,
            release.tag,
            release.assets.len()
        );
        Ok(release)
    }

    /// Fetch the latest release and pick the asset for `target`.
    pub async fn fetch_latest_matching_asset(
        &self,
        target: &PlatformTarget,
    ) -> Result<SelectedAsset> {
        let release = self.fetch_latest().await?;
        let asset = select_asset(&release, target)?.clone();
        info!("Selected asset {} for {}", asset.name, target);

        Ok(SelectedAsset {
            tag: release.tag,
            target: *target,
            asset,
        })
    }

    fn fetch_error(&self, message: String) -> BootstrapError {
        BootstrapError::ReleaseFetch {
            project: self.project.clone(),
            message,
        }
    }
}

/// Expected asset name prefix: `luat-lsp-<tag>-<triple>`.
pub fn asset_prefix(tag: &str, target: &PlatformTarget) -> String {
    format!("{}-{}-{}", SERVER_BINARY, tag, target.triple())
}

/// Pick the first asset, in listing order, whose name is the expected
/// prefix followed by a recognised archive suffix.
pub fn select_asset<'a>(
    release: &'a ReleaseDescriptor,
    target: &PlatformTarget,
) -> Result<&'a AssetDescriptor> {
    let prefix = asset_prefix(&release.tag, target);

    release
        .assets
        .iter()
        .find(|asset| {
            asset.name.starts_with(&prefix) && ArchiveKind::from_name(&asset.name).is_some()
        })
        .ok_or_else(|| BootstrapError::AssetNotFound {
            tag: release.tag.clone(),
            target: target.triple().to_string(),
            prefix,
        })
}

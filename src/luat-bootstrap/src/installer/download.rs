//! Streaming asset download with bounded, checked redirects.

use std::path::Path;

use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::{Client, Response, Url, header};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::ReleaseSection;
use crate::error::{BootstrapError, Result};
use crate::release::http::create_http_client;

/// Downloads release assets.
///
/// Redirects are followed by hand so every hop can be checked: the hop
/// count is capped and a redirect may not leave HTTPS unless explicitly
/// allowed.
#[derive(Clone)]
pub struct AssetDownloader {
    client: Client,
    max_redirects: usize,
    allow_insecure_redirects: bool,
}

impl AssetDownloader {
    /// Create a downloader from release options.
    pub fn new(config: &ReleaseSection) -> Result<Self> {
        let client = create_http_client(config.timeout(), Policy::none()).map_err(|message| {
            BootstrapError::Download {
                url: config.api_base.clone(),
                message,
            }
        })?;

        Ok(Self {
            client,
            max_redirects: config.max_redirects,
            allow_insecure_redirects: config.allow_insecure_redirects,
        })
    }

    /// Stream `url` into `dest`, creating or truncating it.
    ///
    /// `on_progress` receives the bytes written so far and the total size
    /// when the server announced one. Returns the number of bytes written.
    pub async fn download_to<F>(&self, url: &str, dest: &Path, mut on_progress: F) -> Result<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        let response = self.open(url).await?;
        let total = response.content_length();
        let mut downloaded: u64 = 0;

        let write_failed =
            |e: std::io::Error| download_error(url, format!("writing {}: {}", dest.display(), e));
        let mut file = tokio::fs::File::create(dest).await.map_err(write_failed)?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| download_error(url, format!("transfer interrupted: {}", e)))?;
            file.write_all(&chunk).await.map_err(write_failed)?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total);
        }

        file.flush().await.map_err(write_failed)?;
        debug!("Downloaded {} bytes from {}", downloaded, url);
        Ok(downloaded)
    }

    /// Send the request, following redirects until a final response.
    async fn open(&self, url: &str) -> Result<Response> {
        let mut current =
            Url::parse(url).map_err(|e| download_error(url, format!("invalid URL: {}", e)))?;
        let mut hops = 0;

        loop {
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| download_error(url, format!("request failed: {}", e)))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        download_error(url, format!("HTTP {} without a Location header", status))
                    })?;

                if hops >= self.max_redirects {
                    return Err(download_error(
                        url,
                        format!("too many redirects (limit {})", self.max_redirects),
                    ));
                }

                let next = redirect_target(&current, location, self.allow_insecure_redirects)
                    .map_err(|message| download_error(url, message))?;
                debug!("Redirect {} -> {}", current, next);
                current = next;
                hops += 1;
                continue;
            }

            if !status.is_success() {
                return Err(download_error(url, format!("HTTP {}", status)));
            }

            return Ok(response);
        }
    }
}

/// Resolve a `Location` header against the current URL.
///
/// Fails when the result is not HTTPS, unless `allow_insecure` is set.
pub fn redirect_target(
    current: &Url,
    location: &str,
    allow_insecure: bool,
) -> std::result::Result<Url, String> {
    let next = current
        .join(location)
        .map_err(|e| format!("invalid redirect location {:?}: {}", location, e))?;

    match next.scheme() {
        "https" => Ok(next),
        "http" if allow_insecure => Ok(next),
        scheme => Err(format!("refusing redirect to non-HTTPS URL ({}): {}", scheme, next)),
    }
}

fn download_error(url: &str, message: String) -> BootstrapError {
    BootstrapError::Download {
        url: url.to_string(),
        message,
    }
}

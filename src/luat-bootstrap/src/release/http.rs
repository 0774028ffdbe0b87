//! HTTP client construction.

use std::time::Duration;

use reqwest::Client;
use reqwest::redirect::Policy;

/// User-Agent for HTTP requests.
pub const USER_AGENT: &str = concat!("luat-bootstrap/", env!("CARGO_PKG_VERSION"));

/// Create an HTTP client with the bootstrapper's identity.
pub fn create_http_client(timeout: Duration, redirect: Policy) -> Result<Client, String> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .redirect(redirect)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

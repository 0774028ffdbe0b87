//! luat-bootstrap - main entry point.
//!
//! Finds, installs and supervises the luat-lsp language server from the
//! terminal:
//! - `target` / `locate` / `status` - inspection
//! - `install` - download the latest release
//! - `run` / `restart` - supervised sessions

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use luat_bootstrap_cli::cli::{Cli, LogLevel, dispatch_command};

fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else if let Ok(env_level) = std::env::var("LUAT_LOG_LEVEL") {
        LogLevel::from_str_loose(&env_level).unwrap_or(cli.log_level)
    } else {
        cli.log_level
    };

    // RUST_LOG, when set, takes precedence over the flags.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_filter_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);
    dispatch_command(cli).await
}

//! CLI argument structures and parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    /// Show informational messages, warnings, and errors
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Find, install and run the luat-lsp language server.
#[derive(Debug, Parser)]
#[command(name = "luat-bootstrap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to <config_dir>/luat/bootstrap.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use this server binary instead of searching for one
    #[arg(long, global = true, value_name = "PATH")]
    pub server_path: Option<PathBuf>,

    /// Start the server with the debug launch profile
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log level for bootstrapper output
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    /// Enable verbose output (same as --log-level debug)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the release target of this machine
    Target,
    /// Show which server binary would be used
    Locate,
    /// Download and install the latest server release
    Install(InstallArgs),
    /// Start the server and keep it running until Ctrl+C
    Run(RunArgs),
    /// Start the server, then restart it
    Restart(RunArgs),
    /// Show configuration, install and discovery status
    Status,
}

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Leave the freshly installed server running until Ctrl+C
    #[arg(long)]
    pub keep_running: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Download without asking when no server is installed
    #[arg(long, short = 'y')]
    pub yes: bool,
}

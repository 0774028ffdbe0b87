//! Command dispatch and execution handlers.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use luat_bootstrap::{
    BootstrapConfig, BootstrapError, InstallManifest, LaunchOutcome, LaunchProfile, Orchestrator,
    PlatformTarget,
};

use super::args::{Cli, Commands, InstallArgs, RunArgs};
use crate::prompt::TerminalUi;

/// Options shared by every command.
struct Options {
    config_path: Option<PathBuf>,
    server_path: Option<PathBuf>,
    debug: bool,
}

impl Options {
    fn load_config(&self) -> Result<BootstrapConfig> {
        let mut config = match &self.config_path {
            Some(path) => BootstrapConfig::load_from(path)?,
            None => BootstrapConfig::load()?,
        };
        if let Some(path) = &self.server_path {
            config.server.path = Some(path.clone());
        }
        if self.debug {
            config.server.profile = LaunchProfile::Debug;
        }
        Ok(config)
    }

    fn orchestrator(&self, assume_yes: bool) -> Result<Arc<Orchestrator>> {
        let config = self.load_config().context("Failed to load configuration")?;
        let ui = Arc::new(TerminalUi::new(assume_yes));
        let orchestrator =
            Orchestrator::new(config, ui).context("Failed to initialize the bootstrapper")?;
        Ok(Arc::new(orchestrator))
    }
}

/// Dispatch a CLI command to its handler.
pub async fn dispatch_command(cli: Cli) -> Result<ExitCode> {
    let options = Options {
        config_path: cli.config,
        server_path: cli.server_path,
        debug: cli.debug,
    };

    match cli.command {
        Commands::Target => run_target(),
        Commands::Locate => run_locate(&options).await,
        Commands::Install(args) => run_install(&options, args).await,
        Commands::Run(args) => run_server(&options, args).await,
        Commands::Restart(args) => run_restart(&options, args).await,
        Commands::Status => run_status(&options).await,
    }
}

/// Errors the orchestrator already showed through the prompter only set the
/// exit code; anything else propagates.
fn already_reported(error: BootstrapError) -> Result<ExitCode> {
    if error.is_user_actionable() {
        Ok(ExitCode::FAILURE)
    } else {
        Err(error.into())
    }
}

fn run_target() -> Result<ExitCode> {
    let target = PlatformTarget::current()?;
    println!("{}", target);
    Ok(ExitCode::SUCCESS)
}

async fn run_locate(options: &Options) -> Result<ExitCode> {
    let orchestrator = options.orchestrator(false)?;
    let report = orchestrator.locate().await;

    for rejected in &report.rejected {
        println!(
            "rejected  {} ({}): {}",
            rejected.path.display(),
            rejected.source,
            rejected.reason
        );
    }
    match report.found {
        Some(found) => {
            println!("found     {} ({})", found.path.display(), found.source);
            Ok(ExitCode::SUCCESS)
        }
        None => bail!("luat-lsp was not found; run `luat-bootstrap install` to download it"),
    }
}

async fn run_install(options: &Options, args: InstallArgs) -> Result<ExitCode> {
    let orchestrator = options.orchestrator(true)?;
    let outcome = match orchestrator.download_server().await {
        Ok(outcome) => outcome,
        Err(e) => return already_reported(e),
    };
    print_outcome(&outcome);

    if args.keep_running {
        log_server_messages(&orchestrator);
        wait_for_interrupt(&orchestrator).await?;
    } else {
        orchestrator.stop().await?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_server(options: &Options, args: RunArgs) -> Result<ExitCode> {
    let orchestrator = options.orchestrator(args.yes)?;
    orchestrator.spawn_crash_watcher();

    let outcome = match orchestrator.ensure_started().await {
        Ok(outcome) => outcome,
        Err(e) => return already_reported(e),
    };
    print_outcome(&outcome);
    if outcome == LaunchOutcome::Declined {
        return Ok(ExitCode::FAILURE);
    }

    log_server_messages(&orchestrator);
    wait_for_interrupt(&orchestrator).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_restart(options: &Options, args: RunArgs) -> Result<ExitCode> {
    let orchestrator = options.orchestrator(args.yes)?;

    let outcome = match orchestrator.ensure_started().await {
        Ok(outcome) => outcome,
        Err(e) => return already_reported(e),
    };
    print_outcome(&outcome);
    if outcome == LaunchOutcome::Declined {
        return Ok(ExitCode::FAILURE);
    }

    let restarted = match orchestrator.restart_server().await {
        Ok(outcome) => outcome,
        Err(e) => return already_reported(e),
    };
    print_outcome(&restarted);

    orchestrator.stop().await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_status(options: &Options) -> Result<ExitCode> {
    let config = options.load_config()?;

    let config_path = options
        .config_path
        .clone()
        .or_else(BootstrapConfig::default_path);
    println!("config:      {}", display_opt(config_path.as_deref()));
    match PlatformTarget::current() {
        Ok(target) => println!("target:      {}", target),
        Err(e) => println!("target:      {}", e),
    }
    println!("profile:     {}", config.server.profile);
    println!("release:     {}/repos/{}", config.release.api_base, config.release.project);

    let install_dir = config.install_dir();
    println!("install dir: {}", display_opt(install_dir.as_deref()));
    if let Some(dir) = &install_dir {
        match InstallManifest::load(dir).await {
            Ok(Some(manifest)) => println!(
                "installed:   {} ({}, {}) at {}",
                manifest.tag,
                manifest.target,
                manifest.asset,
                manifest.installed_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            Ok(None) => println!("installed:   no"),
            Err(e) => println!("installed:   unreadable manifest: {}", e),
        }
    }

    let orchestrator = options.orchestrator(false)?;
    let report = orchestrator.locate().await;
    match &report.found {
        Some(found) => println!("server:      {} ({})", found.path.display(), found.source),
        None => println!("server:      not found"),
    }
    for rejected in &report.rejected {
        println!("rejected:    {} ({})", rejected.path.display(), rejected.reason);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_outcome(outcome: &LaunchOutcome) {
    match outcome {
        LaunchOutcome::Started { path, source } => {
            println!("luat-lsp started from {} ({})", path.display(), source)
        }
        LaunchOutcome::Restarted { path } => println!("luat-lsp restarted ({})", path.display()),
        LaunchOutcome::AlreadyRunning { path } => {
            println!("luat-lsp is already running ({})", path.display())
        }
        LaunchOutcome::Declined => println!("Download declined; luat-lsp is not running."),
    }
}

fn display_opt(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(unavailable)".to_string())
}

/// Log every message the server sends, picking up each new session after a
/// restart.
fn log_server_messages(orchestrator: &Arc<Orchestrator>) {
    let orchestrator = Arc::clone(orchestrator);
    let mut sessions = orchestrator.subscribe_sessions();
    tokio::spawn(async move {
        loop {
            sessions.mark_unchanged();
            let incoming = orchestrator
                .session()
                .await
                .as_mut()
                .and_then(|session| session.take_incoming());
            if let Some(mut incoming) = incoming {
                while let Some(message) = incoming.recv().await {
                    info!("server: {}", message);
                }
                debug!("Server message stream closed");
            }
            if sessions.changed().await.is_err() {
                break;
            }
        }
    });
}

async fn wait_for_interrupt(orchestrator: &Orchestrator) -> Result<()> {
    println!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    println!();
    orchestrator.stop().await?;
    Ok(())
}

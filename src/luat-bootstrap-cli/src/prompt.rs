//! Terminal implementation of the bootstrapper's user interaction.

use std::io::{Write, stderr};
use std::path::Path;

use async_trait::async_trait;
use luat_bootstrap::locator::RejectedCandidate;
use luat_bootstrap::{BootstrapError, CrashChoice, ExitReport, InstallProgress, UserInteraction};

/// Prompts on stderr and reads answers from stdin.
#[derive(Debug, Default)]
pub struct TerminalUi {
    assume_yes: bool,
}

impl TerminalUi {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    async fn ask(&self, question: String) -> bool {
        let answer = tokio::task::spawn_blocking(move || {
            let mut err = stderr();
            let _ = write!(err, "{} [y/N] ", question);
            let _ = err.flush();
            let mut input = String::new();
            std::io::stdin().read_line(&mut input).map(|_| input)
        })
        .await;

        match answer {
            Ok(Ok(input)) => is_yes(&input),
            _ => false,
        }
    }
}

fn is_yes(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("y") || input.eq_ignore_ascii_case("yes")
}

/// One-line rendering of a progress event.
pub fn progress_line(event: &InstallProgress) -> String {
    match event {
        InstallProgress::Fetching => "Looking up the latest release...".to_string(),
        InstallProgress::Downloading { downloaded, total } => match event.percentage() {
            Some(pct) => format!(
                "Downloading... {:.0}% ({}/{})",
                pct,
                downloaded,
                total.unwrap_or_default()
            ),
            None => format!("Downloading... {} bytes", downloaded),
        },
        InstallProgress::Extracting => "Extracting...".to_string(),
        InstallProgress::Finalizing => "Installing...".to_string(),
    }
}

#[async_trait]
impl UserInteraction for TerminalUi {
    async fn confirm_download(&self) -> bool {
        if self.assume_yes {
            return true;
        }
        self.ask("luat-lsp is not installed. Download the latest release?".to_string())
            .await
    }

    fn progress(&self, event: InstallProgress) {
        let mut err = stderr();
        let _ = write!(err, "\r\x1b[2K  {}", progress_line(&event));
        if event == InstallProgress::Finalizing {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }

    async fn report_error(&self, error: &BootstrapError) {
        eprintln!("\nError: {}", error);
    }

    async fn notify_crash(&self, path: &Path, exit: &ExitReport) -> CrashChoice {
        eprintln!("\nluat-lsp ({}) stopped unexpectedly: {}", path.display(), exit);
        if self.ask("Restart the server?".to_string()).await {
            CrashChoice::Restart
        } else {
            CrashChoice::Ignore
        }
    }

    async fn notify_rejected(&self, rejected: &RejectedCandidate) {
        eprintln!(
            "Skipping {} ({}): {}",
            rejected.path.display(),
            rejected.source,
            rejected.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_progress_line() {
        let event = InstallProgress::Downloading {
            downloaded: 50,
            total: Some(200),
        };
        assert_eq!(progress_line(&event), "Downloading... 25% (50/200)");

        let unknown = InstallProgress::Downloading {
            downloaded: 10,
            total: None,
        };
        assert_eq!(progress_line(&unknown), "Downloading... 10 bytes");
    }

    #[tokio::test]
    async fn test_assume_yes_skips_prompt() {
        assert!(TerminalUi::new(true).confirm_download().await);
    }
}

//! Shared fixtures for integration tests.
//!
//! Fake servers are `/bin/sh` scripts that wait for the first request
//! header, print a canned framed response to `initialize` and then either
//! idle on stdin or exit.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use luat_bootstrap::supervisor::INITIALIZE_ID;
use luat_bootstrap::{BootstrapError, CrashChoice, ExitReport, InstallProgress, UserInteraction};

/// `initialize` result every fake server answers with.
pub const INITIALIZE_RESULT: &str = r#"{"capabilities":{"hoverProvider":true}}"#;

/// What the fake server does after answering `initialize`.
pub enum AfterInit {
    /// Read stdin until it closes.
    Idle,
    /// Exit with this code after a short pause.
    Crash(i32),
    /// Send one more frame, then idle.
    Notify(&'static str),
}

fn frame(body: &str) -> String {
    format!("Content-Length: {}\\r\\n\\r\\n{}", body.len(), body)
}

fn answer_initialize() -> String {
    let response = format!(
        r#"{{"jsonrpc":"2.0","id":"{}","result":{}}}"#,
        INITIALIZE_ID, INITIALIZE_RESULT
    );
    format!("read -r _\nprintf '{}'\n", frame(&response))
}

/// Script for a fake server.
pub fn fake_server(after: AfterInit) -> String {
    let mut script = format!("#!/bin/sh\n{}", answer_initialize());
    match after {
        AfterInit::Idle => script.push_str("exec cat >/dev/null\n"),
        AfterInit::Crash(code) => script.push_str(&format!("sleep 1\nexit {}\n", code)),
        AfterInit::Notify(body) => {
            script.push_str(&format!("printf '{}'\nexec cat >/dev/null\n", frame(body)));
        }
    }
    script
}

/// Script for a server that rejects `initialize`.
pub fn rejecting_server() -> String {
    let response = format!(
        r#"{{"jsonrpc":"2.0","id":"{}","error":{{"code":-32600,"message":"unsupported client"}}}}"#,
        INITIALIZE_ID
    );
    format!(
        "#!/bin/sh\nread -r _\nprintf '{}'\nexec cat >/dev/null\n",
        frame(&response)
    )
}

/// Script for a server that writes invalid UTF-8 to stderr, answers, and
/// logs again a second later.
pub fn noisy_stderr_server() -> String {
    format!(
        "#!/bin/sh\nprintf 'caf\\377\\n' >&2\n{}\
         sleep 1\necho 'later log line' >&2\nexec cat >/dev/null\n",
        answer_initialize()
    )
}

/// Script for a server that sends `count` copies of `body` right after
/// answering, then idles.
pub fn flooding_server(count: usize, body: &str) -> String {
    format!(
        "#!/bin/sh\n{}i=0\nwhile [ $i -lt {} ]; do\n\
         printf '{}'\ni=$((i+1))\ndone\nexec cat >/dev/null\n",
        answer_initialize(),
        count,
        frame(body)
    )
}

/// Script for a server that exits with code 3 on its first run and idles
/// on every later one. `marker` records the first run.
pub fn crash_once_server(marker: &Path) -> String {
    format!(
        "#!/bin/sh\n{}if [ -e '{m}' ]; then exec cat >/dev/null; fi\n\
         : > '{m}'\nsleep 1\nexit 3\n",
        answer_initialize(),
        m = marker.display()
    )
}

/// Script for a server that records `RUST_LOG` into `record` before
/// answering.
pub fn env_recording_server(record: &Path) -> String {
    let idle = fake_server(AfterInit::Idle);
    let body = idle.trim_start_matches("#!/bin/sh\n");
    format!(
        "#!/bin/sh\nprintf '%s' \"${{RUST_LOG:-unset}}\" > '{}'\n{}",
        record.display(),
        body
    )
}

/// Write an executable script.
pub fn write_script(path: &Path, script: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, script).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Build a `.tar.gz` with one file at `path`.
pub fn tar_gz(path: &str, contents: &[u8]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, contents).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Binary path inside `dir`.
pub fn binary_in(dir: &Path) -> PathBuf {
    dir.join("luat-lsp")
}

// =============================================================================
// Scripted user interaction
// =============================================================================

/// Answers prompts from a script and records everything it was told.
pub struct ScriptedUi {
    accept_download: bool,
    restarts_allowed: AtomicUsize,
    pub prompts: AtomicUsize,
    pub errors: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<InstallProgress>>,
    pub crashes: Mutex<Vec<ExitReport>>,
    pub crashed: Notify,
}

impl ScriptedUi {
    pub fn new(accept_download: bool) -> Self {
        Self {
            accept_download,
            restarts_allowed: AtomicUsize::new(0),
            prompts: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
            progress: Mutex::new(Vec::new()),
            crashes: Mutex::new(Vec::new()),
            crashed: Notify::new(),
        }
    }

    /// Answer `Restart` to the next `count` crash notifications.
    pub fn with_restarts(self, count: usize) -> Self {
        self.restarts_allowed.store(count, Ordering::SeqCst);
        self
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserInteraction for ScriptedUi {
    async fn confirm_download(&self) -> bool {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.accept_download
    }

    fn progress(&self, event: InstallProgress) {
        self.progress.lock().unwrap().push(event);
    }

    async fn report_error(&self, error: &BootstrapError) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    async fn notify_crash(&self, _path: &Path, exit: &ExitReport) -> CrashChoice {
        self.crashes.lock().unwrap().push(exit.clone());
        self.crashed.notify_one();

        let allowed = self.restarts_allowed.load(Ordering::SeqCst);
        if allowed > 0 {
            self.restarts_allowed.store(allowed - 1, Ordering::SeqCst);
            CrashChoice::Restart
        } else {
            CrashChoice::Ignore
        }
    }
}

//! Integration tests for server sessions: handshake, pass-through, stop,
//! restart and crash detection, against `/bin/sh` fake servers.

#![cfg(unix)]

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use serial_test::serial;
use tempfile::TempDir;

use common::{
    AfterInit, binary_in, env_recording_server, fake_server, flooding_server, noisy_stderr_server,
    rejecting_server, write_script,
};
use luat_bootstrap::config::SupervisorSection;
use luat_bootstrap::supervisor::{INCOMING_CAPACITY, LaunchSpec};
use luat_bootstrap::{
    BootstrapError, ClientSupervisor, LaunchProfile, ServerSession, SessionState, SupervisorEvent,
};

fn quick() -> SupervisorSection {
    SupervisorSection {
        handshake_timeout_secs: 5,
        shutdown_timeout_secs: 1,
    }
}

fn server_with(script: &str) -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = binary_in(dir.path());
    write_script(&path, script);
    (dir, path)
}

// =============================================================================
// Start and handshake
// =============================================================================

#[tokio::test]
#[serial]
async fn test_start_completes_handshake() {
    let (_dir, path) = server_with(&fake_server(AfterInit::Idle));
    let (supervisor, _events) = ClientSupervisor::new(&quick());

    let mut session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();

    assert_eq!(session.state(), SessionState::Running);
    assert!(session.pid().is_some());
    assert_eq!(session.path(), path.as_path());
    assert_eq!(
        session.initialize_result(),
        &json!({"capabilities": {"hoverProvider": true}})
    );

    session.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_rejected_initialize_is_handshake_error() {
    let (_dir, path) = server_with(&rejecting_server());
    let (supervisor, _events) = ClientSupervisor::new(&quick());

    let err = supervisor.start(&path, LaunchProfile::Default).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Handshake { .. }));
    assert!(err.to_string().contains("unsupported client"));
}

#[tokio::test]
#[serial]
async fn test_silent_server_times_out() {
    let (_dir, path) = server_with("#!/bin/sh\nexec cat >/dev/null\n");
    let spec = LaunchSpec {
        handshake_timeout: Duration::from_millis(300),
        shutdown_timeout: Duration::from_millis(300),
        ..LaunchSpec::new(&path)
    };

    let err = ServerSession::start(&spec, None).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Handshake { .. }));
}

#[tokio::test]
#[serial]
async fn test_server_exiting_before_handshake() {
    let (_dir, path) = server_with("#!/bin/sh\nexit 0\n");
    let (supervisor, mut events) = ClientSupervisor::new(&quick());

    let err = supervisor.start(&path, LaunchProfile::Default).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Handshake { .. }));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
#[serial]
async fn test_debug_profile_sets_server_log_level() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("rust_log");
    let path = binary_in(dir.path());
    write_script(&path, &env_recording_server(&record));
    let (supervisor, _events) = ClientSupervisor::new(&quick());

    let mut session = supervisor.start(&path, LaunchProfile::Debug).await.unwrap();
    session.stop().await.unwrap();
    assert_eq!(std::fs::read_to_string(&record).unwrap(), "luat_lsp=debug");

    let mut session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();
    session.stop().await.unwrap();
    assert_ne!(std::fs::read_to_string(&record).unwrap(), "luat_lsp=debug");
}

// =============================================================================
// Channel
// =============================================================================

#[tokio::test]
#[serial]
async fn test_server_messages_pass_through() {
    let notification = concat!(
        r#"{"jsonrpc":"2.0","method":"window/logMessage","#,
        r#""params":{"type":3,"message":"ready"}}"#
    );
    let (_dir, path) = server_with(&fake_server(AfterInit::Notify(notification)));
    let (supervisor, _events) = ClientSupervisor::new(&quick());

    let mut session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();
    let mut incoming = session.take_incoming().unwrap();
    assert!(session.take_incoming().is_none());

    let message = tokio::time::timeout(Duration::from_secs(5), incoming.recv())
        .await
        .unwrap()
        .unwrap();
    let expected: Value = serde_json::from_str(notification).unwrap();
    assert_eq!(message, expected);

    session
        .send(json!({"jsonrpc": "2.0", "method": "textDocument/didOpen", "params": {}}))
        .await
        .unwrap();
    session.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_send_after_stop_fails() {
    let (_dir, path) = server_with(&fake_server(AfterInit::Idle));
    let (supervisor, _events) = ClientSupervisor::new(&quick());

    let mut session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();
    session.stop().await.unwrap();

    let err = session.send(json!({"jsonrpc": "2.0", "method": "x"})).await.unwrap_err();
    assert!(matches!(err, BootstrapError::Channel { .. }));
    assert!(!err.is_user_actionable());
}

#[tokio::test]
#[serial]
async fn test_unread_messages_are_bounded() {
    let notification = r#"{"jsonrpc":"2.0","method":"window/logMessage","params":{}}"#;
    let sent = INCOMING_CAPACITY + 100;
    let (_dir, path) = server_with(&flooding_server(sent, notification));
    let (supervisor, mut events) = ClientSupervisor::new(&quick());

    let mut session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut incoming = session.take_incoming().unwrap();
    let mut buffered = 0;
    while incoming.try_recv().is_ok() {
        buffered += 1;
    }
    assert_eq!(buffered, INCOMING_CAPACITY);
    assert_eq!(session.state(), SessionState::Running);

    session
        .send(json!({"jsonrpc": "2.0", "method": "textDocument/didOpen", "params": {}}))
        .await
        .unwrap();
    session.stop().await.unwrap();
    assert!(events.try_recv().is_err());
}

#[tokio::test]
#[serial]
async fn test_invalid_utf8_on_stderr_keeps_session_running() {
    let (_dir, path) = server_with(&noisy_stderr_server());
    let (supervisor, mut events) = ClientSupervisor::new(&quick());

    let mut session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(session.state(), SessionState::Running);
    assert!(session.exit_report().is_none());
    assert!(events.try_recv().is_err());

    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
}

// =============================================================================
// Stop, restart, crash
// =============================================================================

#[tokio::test]
#[serial]
async fn test_stop_is_idempotent() {
    let (_dir, path) = server_with(&fake_server(AfterInit::Idle));
    let (supervisor, mut events) = ClientSupervisor::new(&quick());

    let mut session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();
    supervisor.stop(&mut session).await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(session.exit_report().is_some());

    supervisor.stop(&mut session).await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);

    assert!(events.try_recv().is_err());
}

#[tokio::test]
#[serial]
async fn test_restart_starts_a_new_process() {
    let (_dir, path) = server_with(&fake_server(AfterInit::Idle));
    let (supervisor, _events) = ClientSupervisor::new(&quick());

    let session = supervisor.start(&path, LaunchProfile::Debug).await.unwrap();
    let first_pid = session.pid();
    let mut states = session.subscribe();

    let mut restarted = supervisor.restart(session).await.unwrap();

    assert_eq!(*states.borrow_and_update(), SessionState::Stopped);
    assert_eq!(restarted.state(), SessionState::Running);
    assert_eq!(restarted.profile(), LaunchProfile::Debug);
    assert_ne!(restarted.pid(), first_pid);

    restarted.stop().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_unexpected_exit_is_reported_as_crash() {
    let (_dir, path) = server_with(&fake_server(AfterInit::Crash(3)));
    let (supervisor, mut events) = ClientSupervisor::new(&quick());

    let mut session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    let SupervisorEvent::Crashed {
        path: crashed,
        pid,
        exit,
    } = event;
    assert_eq!(crashed, path);
    assert_eq!(pid, session.pid());
    assert_eq!(exit.code, Some(3));

    assert_eq!(session.state(), SessionState::Crashed);
    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
#[serial]
async fn test_dropping_session_kills_quietly() {
    let (_dir, path) = server_with(&fake_server(AfterInit::Idle));
    let (supervisor, mut events) = ClientSupervisor::new(&quick());

    let session = supervisor.start(&path, LaunchProfile::Default).await.unwrap();
    drop(session);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err());
}

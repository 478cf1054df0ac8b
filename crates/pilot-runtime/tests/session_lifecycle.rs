//! Integration tests for per-device session supervision.
//!
//! Scripts are small shell programs written into a temp directory; the
//! device identifier arrives as `$1` per the automation program contract.
//! No device or bridge tool is required: helper cleanup failures are logged
//! and ignored, which is exactly the production behavior.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pilot_runtime::{DeviceSession, Error, ScriptSpec, SessionConfig, SessionState};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn quick_config() -> SessionConfig {
    SessionConfig {
        stop_grace: Duration::from_millis(500),
        ..SessionConfig::default()
    }
}

type CapturedLines = Arc<Mutex<Vec<(String, String)>>>;

fn capturing_observer() -> (CapturedLines, pilot_runtime::LineObserver) {
    let lines: CapturedLines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let observer: pilot_runtime::LineObserver = Arc::new(move |device: &str, line: &str| {
        sink.lock().unwrap().push((device.to_string(), line.to_string()));
    });
    (lines, observer)
}

#[tokio::test]
async fn start_while_running_reports_already_running() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "long.sh", "sleep 30");
    let session = DeviceSession::new("dev-1", quick_config());
    let spec = ScriptSpec::new(&script);

    session.start(&spec).await.unwrap();
    assert_eq!(session.state(), SessionState::Running);

    match session.start(&spec).await {
        Err(Error::AlreadyRunning { device }) => assert_eq!(device, "dev-1"),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Running);

    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn stop_on_idle_session_is_a_noop() {
    let session = DeviceSession::new("dev-1", quick_config());
    assert_eq!(session.state(), SessionState::Idle);
    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn nonzero_exit_returns_session_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "fail.sh", "echo about to fail\nexit 1");
    let session = DeviceSession::new("dev-1", quick_config());

    session.start(&ScriptSpec::new(&script)).await.unwrap();
    session.wait_idle().await;
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn spawn_failure_leaves_session_idle() {
    let session = DeviceSession::new("dev-1", quick_config());
    let result = session
        .start(&ScriptSpec::new("/definitely/not/a/program"))
        .await;
    assert!(matches!(result, Err(Error::Spawn { .. })));
    assert_eq!(session.state(), SessionState::Idle);

    // The session is reusable after the failed launch.
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "ok.sh", "exit 0");
    session.start(&ScriptSpec::new(&script)).await.unwrap();
    session.wait_idle().await;
}

#[tokio::test]
async fn output_lines_are_forwarded_in_order_with_device_tag() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "chatty.sh",
        "echo \"hello from $1\"\necho second line",
    );
    let (lines, observer) = capturing_observer();
    let session = DeviceSession::with_observer("dev-7", quick_config(), observer);

    session.start(&ScriptSpec::new(&script)).await.unwrap();
    session.wait_idle().await;

    let lines = lines.lock().unwrap();
    assert_eq!(
        *lines,
        vec![
            ("dev-7".to_string(), "hello from dev-7".to_string()),
            ("dev-7".to_string(), "second line".to_string()),
        ]
    );
}

#[tokio::test]
async fn stop_terminates_a_running_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "long.sh", "sleep 30");
    let session = DeviceSession::new("dev-1", quick_config());

    session.start(&ScriptSpec::new(&script)).await.unwrap();
    let started = Instant::now();
    session.stop().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "stop took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn sigterm_ignoring_script_is_force_killed_within_the_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "stubborn.sh",
        "trap '' TERM\nwhile :; do sleep 1; done",
    );
    let session = DeviceSession::new("dev-1", quick_config());

    session.start(&ScriptSpec::new(&script)).await.unwrap();
    // Give the shell a moment to install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    session.stop().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "stop took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn session_can_run_again_after_a_completed_run() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "ok.sh", "echo done");
    let session = DeviceSession::new("dev-1", quick_config());
    let spec = ScriptSpec::new(&script);

    session.start(&spec).await.unwrap();
    session.wait_idle().await;
    session.start(&spec).await.unwrap();
    session.wait_idle().await;
    assert_eq!(session.state(), SessionState::Idle);
}

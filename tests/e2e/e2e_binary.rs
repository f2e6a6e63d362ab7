//! Exit status of the `vllm-sidecar` binary.
//!
//! The engine is a shell script standing in for the Python interpreter; it
//! ignores the vLLM arguments it is handed.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::e2e_shutdown::{is_gone, read_pid};
use crate::fixture::{free_port, FakeEngine};

fn write_engine_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("engine.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn sidecar(engine: &Path, engine_port: u16, bind_port: u16) -> Child {
    Command::new(env!("CARGO_BIN_EXE_vllm-sidecar"))
        .arg("--bind")
        .arg(format!("127.0.0.1:{}", bind_port))
        .arg("--engine-port")
        .arg(engine_port.to_string())
        .arg("--engine-python")
        .arg(engine)
        .args(["--probe-interval-secs", "1", "--probe-timeout-secs", "1"])
        .args(["--shutdown-grace-secs", "2", "--drain-timeout-secs", "1"])
        .env("RUST_LOG", "vllm_sidecar=debug")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start the sidecar binary")
}

async fn exit_status(mut child: Child) -> ExitStatus {
    tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("sidecar did not exit")
        .unwrap()
}

fn send_sigterm(child: &Child) {
    let pid = child.id().expect("sidecar already exited") as libc::pid_t;
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);
}

async fn wait_for_ping(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/ping", port);
    for _ in 0..250 {
        if let Ok(resp) = client.get(&url).send().await {
            assert_eq!(resp.status(), 200);
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("sidecar never started serving");
}

#[tokio::test]
async fn test_exits_nonzero_when_engine_cannot_start() {
    let child = sidecar(Path::new("/nonexistent/python3"), free_port(), free_port());

    let status = exit_status(child).await;
    assert!(!status.success());
    assert_eq!(status.code(), Some(1));
}

#[tokio::test]
async fn test_sigterm_during_startup_exits_zero_and_reaps_engine() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("engine.pid");
    let engine = write_engine_script(
        dir.path(),
        &format!(
            "echo $$ > {0}.tmp && mv {0}.tmp {0}\nexec sleep 300",
            pid_file.display()
        ),
    );

    // Nothing listens on the engine port, so the sidecar stays in startup.
    let child = sidecar(&engine, free_port(), free_port());
    let engine_pid = read_pid(&pid_file).await;

    send_sigterm(&child);
    let status = exit_status(child).await;

    assert_eq!(status.code(), Some(0));
    assert!(is_gone(engine_pid), "engine process {} was orphaned", engine_pid);
}

#[tokio::test]
async fn test_sigterm_while_serving_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let engine = write_engine_script(dir.path(), "exec sleep 300");
    let fake = FakeEngine::start(0).await;
    let bind_port = free_port();

    let child = sidecar(&engine, fake.endpoint().port, bind_port);
    wait_for_ping(bind_port).await;

    send_sigterm(&child);
    let status = exit_status(child).await;
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn test_exits_nonzero_when_engine_dies_while_serving() {
    let dir = tempfile::tempdir().unwrap();
    let engine = write_engine_script(dir.path(), "sleep 1\nexit 7");
    let fake = FakeEngine::start(0).await;
    let bind_port = free_port();

    let child = sidecar(&engine, fake.endpoint().port, bind_port);
    wait_for_ping(bind_port).await;

    let status = exit_status(child).await;
    assert_eq!(status.code(), Some(1));
}

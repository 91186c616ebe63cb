//! Common utilities for worker integration tests
//!
//! These tests drive the real `stub-worker` binary built alongside the
//! library, so they exercise actual process spawning, sockets and signals.

use std::{
  path::Path,
  time::{Duration, Instant},
};

use editmind::{
  config::{TransportKind, WorkerConfig},
  worker::{Supervisor, WorkerState},
};

/// Worker config running the stub with extra flags, tuned for fast tests
#[allow(dead_code)]
pub fn stub_config(flags: &[&str], socket_dir: &Path) -> WorkerConfig {
  WorkerConfig {
    program: env!("CARGO_BIN_EXE_stub-worker").to_string(),
    args: flags.iter().map(|f| f.to_string()).collect(),
    transport: TransportKind::Auto,
    socket_dir: Some(socket_dir.to_path_buf()),
    startup_timeout_ms: 10_000,
    poll_interval_ms: 20,
    restart_backoff_ms: 50,
    shutdown_grace_ms: 2_000,
    request_timeout_secs: 30,
    ..Default::default()
  }
}

/// Poll `check` until it holds or `timeout` passes
#[allow(dead_code)]
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> bool,
{
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  check()
}

/// Wait for the supervisor to reach `state`
#[allow(dead_code)]
pub async fn wait_for_state(supervisor: &Supervisor, state: WorkerState, timeout: Duration) -> bool {
  let mut rx = supervisor.subscribe();
  tokio::time::timeout(timeout, rx.wait_for(|s| *s == state)).await.is_ok()
}

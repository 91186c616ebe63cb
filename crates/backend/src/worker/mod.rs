//! Worker module - the supervised analysis process and typed requests to it
//!
//! [`Supervisor`] owns the process lifecycle (spawn, readiness, crash
//! detection, bounded restart, teardown). [`WorkerClient`] issues typed
//! requests over the supervisor's current channel and implements
//! [`AnalysisWorker`], which is all the indexing pipeline depends on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ipc::{IpcError, RequestKind};

pub mod client;
pub mod supervisor;

pub use client::{AnalysisWorker, WorkerClient};
pub use supervisor::{Supervisor, restart_delay};

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
  #[error("Worker did not accept a connection within {0:?}")]
  StartupTimeout(Duration),
  #[error("Worker exited during startup ({status})")]
  ExitedDuringStartup { status: String },
  #[error("Worker is permanently down after {restarts} consecutive restarts")]
  PermanentlyDown { restarts: u32 },
  #[error("Worker is not running")]
  NotRunning,
  #[error("Failed to spawn worker: {0}")]
  Spawn(String),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("Worker reported an error: {message}")]
  Remote { message: String },
  #[error("{kind} request timed out after {timeout:?}")]
  RequestTimeout { kind: RequestKind, timeout: Duration },
  #[error("Unexpected {received} response to {request} request")]
  UnexpectedResponse { request: RequestKind, received: String },
}

/// Lifecycle state of the supervised worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
  #[default]
  Stopped,
  Starting,
  Running,
  /// Exited unexpectedly; a restart may be pending
  Crashed,
  /// Restart budget exhausted; only an explicit `start()` recovers
  PermanentlyDown,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Stopped => "stopped",
      Self::Starting => "starting",
      Self::Running => "running",
      Self::Crashed => "crashed",
      Self::PermanentlyDown => "permanently_down",
    };
    f.write_str(s)
  }
}

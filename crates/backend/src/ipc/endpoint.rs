//! Transport endpoint resolution.
//!
//! Every worker generation gets a fresh endpoint. On unix this is a socket
//! file in a temp directory; elsewhere (or when TCP is forced) it is an
//! ephemeral loopback port picked by the OS.

use std::{
  fmt,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, warn};

use super::IpcError;
use crate::domain::config::{TransportKind, WorkerConfig};

/// Distinguishes resolvers created in the same host process.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Longest socket path accepted by every platform we target (sun_path is 104 on macOS).
const MAX_SOCKET_PATH: usize = 103;

/// Local address of one worker generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  UnixSocket(PathBuf),
  TcpPort(u16),
}

impl Endpoint {
  /// Parameters passed to the worker so it listens on this endpoint
  pub fn spawn_args(&self) -> Vec<String> {
    match self {
      Self::UnixSocket(path) => vec!["--socket".to_string(), path.to_string_lossy().into_owned()],
      Self::TcpPort(port) => vec!["--port".to_string(), port.to_string()],
    }
  }

  /// On-disk artifact owned by this endpoint, if any
  pub fn artifact(&self) -> Option<&Path> {
    match self {
      Self::UnixSocket(path) => Some(path),
      Self::TcpPort(_) => None,
    }
  }

  /// Remove the endpoint's artifact. A missing file is not an error.
  pub async fn cleanup(&self) -> Result<(), IpcError> {
    let Some(path) = self.artifact() else {
      return Ok(());
    };

    match tokio::fs::remove_file(path).await {
      Ok(()) => {
        debug!(path = %path.display(), "Removed worker socket");
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UnixSocket(path) => write!(f, "unix://{}", path.display()),
      Self::TcpPort(port) => write!(f, "tcp://127.0.0.1:{}", port),
    }
  }
}

/// Computes endpoints for successive worker generations.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
  kind: TransportKind,
  socket_dir: PathBuf,
  instance: u64,
}

impl EndpointResolver {
  pub fn new(kind: TransportKind, socket_dir: impl Into<PathBuf>) -> Self {
    Self {
      kind,
      socket_dir: socket_dir.into(),
      instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
    }
  }

  pub fn from_config(config: &WorkerConfig) -> Self {
    Self::new(config.transport, config.socket_dir())
  }

  /// Socket path for a generation; stable for a given resolver
  pub fn socket_path(&self, generation: u64) -> PathBuf {
    self.socket_dir.join(format!(
      "editmind-{}-{}-{}.sock",
      std::process::id(),
      self.instance,
      generation
    ))
  }

  /// Resolve a fresh endpoint for the given worker generation.
  pub async fn resolve(&self, generation: u64) -> Result<Endpoint, IpcError> {
    match self.kind {
      TransportKind::Tcp => Self::ephemeral_port().await,
      TransportKind::Unix => self.unix_socket(generation).await,
      TransportKind::Auto if cfg!(unix) => self.unix_socket(generation).await,
      TransportKind::Auto => Self::ephemeral_port().await,
    }
  }

  async fn unix_socket(&self, generation: u64) -> Result<Endpoint, IpcError> {
    if !cfg!(unix) {
      return Err(IpcError::Unsupported("unix domain sockets"));
    }

    tokio::fs::create_dir_all(&self.socket_dir).await?;

    let path = self.socket_path(generation);
    if path.as_os_str().len() > MAX_SOCKET_PATH {
      warn!(path = %path.display(), "Socket path exceeds the portable length limit; binding may fail");
    }

    match tokio::fs::remove_file(&path).await {
      Ok(()) => debug!(path = %path.display(), "Removed stale worker socket"),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }

    Ok(Endpoint::UnixSocket(path))
  }

  /// Ask the OS for a free loopback port, then release it for the worker to bind.
  async fn ephemeral_port() -> Result<Endpoint, IpcError> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(Endpoint::TcpPort(port))
  }
}

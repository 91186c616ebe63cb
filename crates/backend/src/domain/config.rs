//! Configuration system for editmind.
//!
//! Config priority: explicit `--config` file > user (~/.config/editmind/config.toml) > defaults

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dirs;

/// Maximum consecutive crash-driven restarts before the worker is considered permanently down.
pub const MAX_RESTARTS: u32 = 5;

/// Linear restart backoff unit: the n-th restart waits `n * RESTART_BACKOFF_MS`.
pub const RESTART_BACKOFF_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

// ============================================================================
// Worker Configuration
// ============================================================================

/// How the host reaches the worker process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
  /// Unix domain socket where available, TCP elsewhere
  #[default]
  Auto,
  /// Always a unix domain socket (unix only)
  Unix,
  /// Always an ephemeral loopback TCP port
  Tcp,
}

/// External analysis worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Program to launch
  pub program: String,

  /// Arguments passed before the transport parameters (`--socket`/`--port`)
  pub args: Vec<String>,

  /// Working directory for the worker process (inherits ours when unset)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub working_dir: Option<PathBuf>,

  /// Transport selection: "auto", "unix", "tcp"
  pub transport: TransportKind,

  /// Directory for unix sockets (defaults to the OS temp dir)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub socket_dir: Option<PathBuf>,

  /// How long `start()` waits for the worker to accept a connection
  pub startup_timeout_ms: u64,

  /// Interval between connection attempts during startup
  pub poll_interval_ms: u64,

  /// Consecutive crash-driven restarts allowed before giving up
  pub max_restarts: u32,

  /// Linear backoff unit between restarts
  pub restart_backoff_ms: u64,

  /// A restarted worker that stays up this long clears the restart counter
  pub stable_after_ms: u64,

  /// Deadline for a single worker request in seconds (0 = wait forever)
  pub request_timeout_secs: u64,

  /// Grace period between SIGTERM and a hard kill on stop
  pub shutdown_grace_ms: u64,

  /// Maximum length of a single protocol frame in bytes
  pub max_frame_bytes: usize,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      program: "python3".to_string(),
      args: vec!["python/analysis_service.py".to_string()],
      working_dir: None,
      transport: TransportKind::Auto,
      socket_dir: None,
      startup_timeout_ms: 60_000,
      poll_interval_ms: 500,
      max_restarts: MAX_RESTARTS,
      restart_backoff_ms: RESTART_BACKOFF_MS,
      stable_after_ms: 180_000,
      request_timeout_secs: 2 * 3600,
      shutdown_grace_ms: 5_000,
      max_frame_bytes: 64 * 1024 * 1024,
    }
  }
}

impl WorkerConfig {
  pub fn startup_timeout(&self) -> Duration {
    Duration::from_millis(self.startup_timeout_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }

  pub fn restart_backoff(&self) -> Duration {
    Duration::from_millis(self.restart_backoff_ms)
  }

  pub fn stable_after(&self) -> Duration {
    Duration::from_millis(self.stable_after_ms)
  }

  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_millis(self.shutdown_grace_ms)
  }

  /// Per-request deadline, `None` when disabled
  pub fn request_timeout(&self) -> Option<Duration> {
    (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
  }

  pub fn socket_dir(&self) -> PathBuf {
    self.socket_dir.clone().unwrap_or_else(dirs::default_socket_dir)
  }
}

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Indexing pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Root of the per-video working directories (checkpoints)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_dir: Option<PathBuf>,

  /// Where generated still frames are written
  #[serde(skip_serializing_if = "Option::is_none")]
  pub thumbnails_dir: Option<PathBuf>,

  /// Abort a video when its representative thumbnail cannot be generated
  pub require_thumbnail: bool,

  /// Offset into the video (seconds) for the representative thumbnail
  pub thumbnail_offset_secs: f64,

  /// ffmpeg binary used for thumbnails
  pub ffmpeg_path: String,

  /// Scenes submitted to the vector store per call
  pub embedding_batch_size: usize,

  /// Videos processed at once; each video's stages stay sequential
  pub concurrency: usize,

  /// JSON-lines file the bundled vector store appends to
  #[serde(skip_serializing_if = "Option::is_none")]
  pub vector_store_path: Option<PathBuf>,

  /// Overrides forwarded verbatim to the worker's analysis config
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub analysis_settings: BTreeMap<String, serde_json::Value>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      output_dir: None,
      thumbnails_dir: None,
      require_thumbnail: true,
      thumbnail_offset_secs: 1.0,
      ffmpeg_path: "ffmpeg".to_string(),
      embedding_batch_size: 50,
      concurrency: 1,
      vector_store_path: None,
      analysis_settings: BTreeMap::new(),
    }
  }
}

impl PipelineConfig {
  pub fn output_dir(&self) -> PathBuf {
    self.output_dir.clone().unwrap_or_else(dirs::default_output_dir)
  }

  pub fn thumbnails_dir(&self) -> PathBuf {
    self.thumbnails_dir.clone().unwrap_or_else(dirs::default_thumbnails_dir)
  }

  pub fn vector_store_path(&self) -> PathBuf {
    self
      .vector_store_path
      .clone()
      .unwrap_or_else(|| dirs::default_data_dir().join("scenes.jsonl"))
  }

  /// Analysis settings as a JSON object, `None` when nothing is overridden
  pub fn analysis_settings(&self) -> Option<serde_json::Value> {
    if self.analysis_settings.is_empty() {
      return None;
    }
    let map: serde_json::Map<String, serde_json::Value> = self
      .analysis_settings
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();
    Some(serde_json::Value::Object(map))
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  pub level: String,

  /// Also write logs to a file in the data directory
  pub file: bool,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  pub rotation: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: false,
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  #[serde(default)]
  pub worker: WorkerConfig,

  #[serde(default)]
  pub pipeline: PipelineConfig,

  #[serde(default)]
  pub logging: LoggingConfig,
}

impl Config {
  /// Load config from an explicit file. Errors are surfaced, not swallowed.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load the user config, falling back to defaults when absent or invalid
  pub fn load_global() -> Self {
    let path = Self::user_config_path();
    if !path.exists() {
      return Self::default();
    }

    match Self::load_from(&path) {
      Ok(config) => config,
      Err(e) => {
        warn!("{}; using defaults", e);
        Self::default()
      }
    }
  }

  /// Resolve the effective config: explicit path if given, else the user config
  pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    match explicit {
      Some(path) => Self::load_from(path),
      None => Ok(Self::load_global()),
    }
  }

  /// Get the user-level config path
  pub fn user_config_path() -> PathBuf {
    dirs::default_config_dir().join("config.toml")
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# editmind configuration
# Place in ~/.config/editmind/config.toml or pass --config <file>

# ============================================================================
# Analysis worker
# ============================================================================

[worker]
# Program and arguments; --socket <path> or --port <n> is appended
program = "{program}"
args = ["{script}"]
# working_dir = "/opt/editmind"

# "auto" (unix socket where available), "unix" or "tcp"
transport = "auto"
# socket_dir = "/tmp"

startup_timeout_ms = {startup}
poll_interval_ms = {poll}

# Linear backoff: the n-th consecutive restart waits n * restart_backoff_ms
max_restarts = {max_restarts}
restart_backoff_ms = {backoff}
# Crashes only count as consecutive until a restart stays up this long
stable_after_ms = {stable_after}

# Deadline for a single transcription/analysis request (0 = no deadline)
request_timeout_secs = {request_timeout}
shutdown_grace_ms = {grace}

# ============================================================================
# Indexing pipeline
# ============================================================================

[pipeline]
# output_dir = "~/.local/share/editmind/analysis"
# thumbnails_dir = "~/.cache/editmind/thumbnails"
require_thumbnail = {require_thumbnail}
thumbnail_offset_secs = {offset:.1}
ffmpeg_path = "{ffmpeg}"
embedding_batch_size = {batch}
concurrency = {concurrency}

# Forwarded to the worker's analysis config
# [pipeline.analysis_settings]
# sample_interval_seconds = 2.0

# ============================================================================
# Logging
# ============================================================================

[logging]
level = "{level}"
file = {file}
rotation = "{rotation}"
"#,
      program = defaults.worker.program,
      script = defaults.worker.args.first().map(String::as_str).unwrap_or_default(),
      startup = defaults.worker.startup_timeout_ms,
      poll = defaults.worker.poll_interval_ms,
      max_restarts = defaults.worker.max_restarts,
      backoff = defaults.worker.restart_backoff_ms,
      stable_after = defaults.worker.stable_after_ms,
      request_timeout = defaults.worker.request_timeout_secs,
      grace = defaults.worker.shutdown_grace_ms,
      require_thumbnail = defaults.pipeline.require_thumbnail,
      offset = defaults.pipeline.thumbnail_offset_secs,
      ffmpeg = defaults.pipeline.ffmpeg_path,
      batch = defaults.pipeline.embedding_batch_size,
      concurrency = defaults.pipeline.concurrency,
      level = defaults.logging.level,
      file = defaults.logging.file,
      rotation = defaults.logging.rotation,
    )
  }
}

//! Logging setup for CLI commands

use editmind::config::LoggingConfig;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

const LOG_FILE: &str = "editmind.log";

/// Directory log files are written to (respects env vars)
pub fn log_dir() -> PathBuf {
  editmind::dirs::default_data_dir()
}

/// Console logging on stderr at info, for commands that run before config is loaded
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> LevelFilter {
  match level.to_lowercase().as_str() {
    "off" => LevelFilter::OFF,
    "error" => LevelFilter::ERROR,
    "warn" => LevelFilter::WARN,
    "debug" => LevelFilter::DEBUG,
    "trace" => LevelFilter::TRACE,
    _ => LevelFilter::INFO,
  }
}

/// Initialize logging from the `[logging]` config section.
///
/// Console logs go to stderr so stdout stays clean for `--json`. With
/// `file = true` logs go to a rolling file in the data directory instead.
/// RUST_LOG overrides the configured level.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&config.level).into())
    .from_env_lossy();

  if !config.file {
    tracing_subscriber::fmt()
      .with_writer(std::io::stderr)
      .with_env_filter(env_filter)
      .with_target(false)
      .init();
    return None;
  }

  let dir = log_dir();
  if std::fs::create_dir_all(&dir).is_err() {
    // Fall back to console-only logging
    init_cli_logging();
    return None;
  }

  let file_appender = match config.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&dir, LOG_FILE),
    "never" => tracing_appender::rolling::never(&dir, LOG_FILE),
    _ => tracing_appender::rolling::daily(&dir, LOG_FILE),
  };
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

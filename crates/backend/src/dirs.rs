use std::path::PathBuf;

/// Get the default base path for editmind data
///
/// Respects the following environment variables (in order of precedence):
/// 1. DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("editmind");
  }

  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("editmind")
}

/// Get the default config directory
///
/// Respects the following environment variables (in order of precedence):
/// 1. CONFIG_DIR - explicit config directory override
/// 2. XDG_CONFIG_HOME - standard XDG config home directory
/// 3. dirs::config_dir() - platform default
pub fn default_config_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("CONFIG_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(xdg_config).join("editmind");
  }

  dirs::config_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("editmind")
}

/// Get the default cache directory (thumbnails live here)
///
/// Respects XDG_CACHE_HOME, then falls back to dirs::cache_dir().
pub fn default_cache_dir() -> PathBuf {
  if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
    return PathBuf::from(xdg_cache).join("editmind");
  }

  dirs::cache_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("editmind")
}

/// Directory holding per-video analysis working directories.
pub fn default_output_dir() -> PathBuf {
  default_data_dir().join("analysis")
}

/// Directory holding generated still frames.
pub fn default_thumbnails_dir() -> PathBuf {
  default_cache_dir().join("thumbnails")
}

/// Directory worker sockets are created in.
///
/// Sockets go to the OS temp directory rather than the data directory because
/// unix socket paths are length-limited (~104 bytes on macOS).
pub fn default_socket_dir() -> PathBuf {
  std::env::temp_dir()
}

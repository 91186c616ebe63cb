//! Still-frame thumbnails, content-addressed by source path (and offset).

use std::{
  path::{Path, PathBuf},
  process::Stdio,
};

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to run {program}: {message}")]
  Spawn { program: String, message: String },
  #[error("Thumbnail extraction failed ({status}): {stderr}")]
  Extraction { status: String, stderr: String },
}

#[async_trait::async_trait]
pub trait Thumbnailer: Send + Sync {
  /// Write a single JPEG frame of `video` taken at `at_secs` to `output`.
  async fn generate(&self, video: &Path, at_secs: f64, output: &Path) -> Result<(), ThumbnailError>;
}

/// Hex SHA-256 of a string
pub fn content_hash(input: &str) -> String {
  hex::encode(Sha256::digest(input.as_bytes()))
}

/// Representative thumbnail for a whole video
pub fn video_thumbnail_path(dir: &Path, video: &Path) -> PathBuf {
  dir.join(format!("{}.jpg", content_hash(&video.to_string_lossy())))
}

/// Thumbnail for the scene of `video` starting at `start_secs`
pub fn scene_thumbnail_path(dir: &Path, video: &Path, start_secs: f64) -> PathBuf {
  dir.join(format!("{}.jpg", scene_key(video, start_secs)))
}

/// Stable key for a scene; also used as its id
pub fn scene_key(video: &Path, start_secs: f64) -> String {
  content_hash(&format!("{}:{}", video.to_string_lossy(), start_secs))
}

pub fn file_url(path: &Path) -> String {
  format!("file://{}", path.display())
}

/// Return `output`, generating it first unless it already exists.
pub async fn ensure_thumbnail(
  thumbnailer: &dyn Thumbnailer,
  video: &Path,
  at_secs: f64,
  output: &Path,
) -> Result<PathBuf, ThumbnailError> {
  if tokio::fs::try_exists(output).await.unwrap_or(false) {
    trace!(path = %output.display(), "Reusing thumbnail");
    return Ok(output.to_path_buf());
  }

  if let Some(parent) = output.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }
  thumbnailer.generate(video, at_secs, output).await?;
  Ok(output.to_path_buf())
}

/// Extracts frames with an `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
  program: String,
  width: u32,
}

impl FfmpegThumbnailer {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      width: 640,
    }
  }
}

#[async_trait::async_trait]
impl Thumbnailer for FfmpegThumbnailer {
  async fn generate(&self, video: &Path, at_secs: f64, output: &Path) -> Result<(), ThumbnailError> {
    let at = format!("{:.3}", at_secs.max(0.0));
    let scale = format!("scale={}:-2", self.width);

    debug!(video = %video.display(), at = %at, "Extracting thumbnail");

    let result = Command::new(&self.program)
      .args(["-hide_banner", "-loglevel", "error", "-y", "-ss", &at, "-i"])
      .arg(video)
      .args(["-frames:v", "1", "-vf", &scale, "-q:v", "4"])
      .arg(output)
      .stdin(Stdio::null())
      .output()
      .await
      .map_err(|e| ThumbnailError::Spawn {
        program: self.program.clone(),
        message: e.to_string(),
      })?;

    if !result.status.success() {
      return Err(ThumbnailError::Extraction {
        status: result.status.to_string(),
        stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
      });
    }

    // ffmpeg exits 0 without writing anything when seeking past the end
    if !tokio::fs::try_exists(output).await.unwrap_or(false) {
      return Err(ThumbnailError::Extraction {
        status: result.status.to_string(),
        stderr: format!("no frame at {at}s"),
      });
    }

    Ok(())
  }
}

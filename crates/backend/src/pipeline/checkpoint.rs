//! Per-video working directory and checkpoint files.
//!
//! A stage is complete exactly when its checkpoint file exists. Checkpoints
//! are only ever written whole (temp file + rename), so a crash mid-write
//! never leaves a file that looks complete.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tracing::trace;

use super::{PipelineError, thumbnail::content_hash};

pub const TRANSCRIPTION_FILE: &str = "transcription.json";
pub const ANALYSIS_FILE: &str = "analysis.json";
pub const SCENES_FILE: &str = "scenes.json";

/// Where the worker writes a transcription before it is validated and promoted
const TRANSCRIPTION_STAGING_FILE: &str = "transcription.partial.json";

/// Which stages already have a checkpoint on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoints {
  pub transcription_done: bool,
  pub analysis_done: bool,
  pub scenes_done: bool,
}

impl Checkpoints {
  pub fn all_done(&self) -> bool {
    self.transcription_done && self.analysis_done && self.scenes_done
  }
}

/// Turn a file stem into a safe directory name.
pub fn sanitize_stem(video: &Path) -> String {
  let stem = video.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
  let cleaned: String = stem
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
        c
      } else {
        '_'
      }
    })
    .collect();

  let cleaned = cleaned.trim_matches('.');
  if cleaned.is_empty() {
    "video".to_string()
  } else {
    cleaned.to_string()
  }
}

/// Working directory name for `video`: the sanitized stem plus a short hash
/// of the absolute path, so same-named files in different folders never
/// share checkpoints.
pub fn work_dir_name(video: &Path) -> String {
  let absolute = std::path::absolute(video).unwrap_or_else(|_| video.to_path_buf());
  let hash = content_hash(&absolute.to_string_lossy());
  format!("{}-{}", sanitize_stem(video), &hash[..8])
}

/// One video and its working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJob {
  pub source: PathBuf,
  pub work_dir: PathBuf,
}

impl VideoJob {
  pub fn new(source: impl Into<PathBuf>, output_dir: &Path) -> Self {
    let source = source.into();
    let work_dir = output_dir.join(work_dir_name(&source));
    Self { source, work_dir }
  }

  pub fn transcription_path(&self) -> PathBuf {
    self.work_dir.join(TRANSCRIPTION_FILE)
  }

  pub fn analysis_path(&self) -> PathBuf {
    self.work_dir.join(ANALYSIS_FILE)
  }

  pub fn scenes_path(&self) -> PathBuf {
    self.work_dir.join(SCENES_FILE)
  }

  pub fn transcription_staging_path(&self) -> PathBuf {
    self.work_dir.join(TRANSCRIPTION_STAGING_FILE)
  }

  pub async fn ensure_dir(&self) -> Result<(), PipelineError> {
    tokio::fs::create_dir_all(&self.work_dir)
      .await
      .map_err(|source| PipelineError::Io {
        path: self.work_dir.clone(),
        source,
      })
  }

  /// Infer completed stages from file existence
  pub async fn probe(&self) -> Checkpoints {
    Checkpoints {
      transcription_done: exists(&self.transcription_path()).await,
      analysis_done: exists(&self.analysis_path()).await,
      scenes_done: exists(&self.scenes_path()).await,
    }
  }
}

async fn exists(path: &Path) -> bool {
  tokio::fs::try_exists(path).await.unwrap_or(false)
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
  let bytes = tokio::fs::read(path).await.map_err(|source| PipelineError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_slice(&bytes).map_err(|source| PipelineError::Json {
    path: path.to_path_buf(),
    source,
  })
}

/// Write `value` as JSON to `path` via a sibling temp file and a rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
  let bytes = serde_json::to_vec_pretty(value).map_err(|source| PipelineError::Json {
    path: path.to_path_buf(),
    source,
  })?;

  let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
  let tmp = path.with_file_name(format!(".{file_name}.tmp"));

  let io_err = |source| PipelineError::Io {
    path: path.to_path_buf(),
    source,
  };
  tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
  if let Err(source) = tokio::fs::rename(&tmp, path).await {
    let _ = tokio::fs::remove_file(&tmp).await;
    return Err(io_err(source));
  }

  trace!(path = %path.display(), bytes = bytes.len(), "Checkpoint written");
  Ok(())
}

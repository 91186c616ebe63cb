//! Indexing pipeline
//!
//! Drives each video through checkpointed stages:
//!
//! ```text
//! probe → thumbnail → transcription → frame analysis → scenes → embedding
//! ```
//!
//! Stages whose checkpoint already exists are skipped. A failing stage ends
//! that video only; the batch always runs to completion and reports one
//! [`VideoOutcome`] per input. Progress is reported through
//! [`ProgressBroadcast`]: each stage a video enters emits a 0% start and a 100%
//! terminal event, with worker-reported progress forwarded in between.

mod checkpoint;
mod embedding;
mod scenes;
mod thumbnail;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use self::{
  checkpoint::{
    ANALYSIS_FILE, Checkpoints, SCENES_FILE, TRANSCRIPTION_FILE, VideoJob, read_json, sanitize_stem, write_json_atomic,
  },
  embedding::{FileVectorStore, SceneDocument, StoreError, VectorStore, describe, scalar_metadata},
  scenes::{synthesize, word_in_frame},
  thumbnail::{
    FfmpegThumbnailer, ThumbnailError, Thumbnailer, content_hash, ensure_thumbnail, file_url, scene_key,
    scene_thumbnail_path, video_thumbnail_path,
  },
};
use crate::{
  domain::{
    artifacts::{Scene, Transcription, UNKNOWN_CATEGORY, VideoAnalysis},
    config::PipelineConfig,
  },
  progress::{ProgressBroadcast, ProgressEvent, Step},
  worker::{AnalysisWorker, WorkerError},
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  #[error("IO error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid JSON in {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error(transparent)]
  Worker(#[from] WorkerError),
  #[error("Thumbnail error: {0}")]
  Thumbnail(#[from] ThumbnailError),
  #[error(transparent)]
  Store(#[from] StoreError),
}

// ============================================================================
// Options & results
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOptions {
  pub output_dir: PathBuf,
  pub thumbnails_dir: PathBuf,
  pub require_thumbnail: bool,
  pub thumbnail_offset_secs: f64,
  pub embedding_batch_size: usize,
  pub concurrency: usize,
  pub analysis_settings: Option<Value>,
}

impl PipelineOptions {
  pub fn from_config(config: &PipelineConfig) -> Self {
    Self {
      output_dir: config.output_dir(),
      thumbnails_dir: config.thumbnails_dir(),
      require_thumbnail: config.require_thumbnail,
      thumbnail_offset_secs: config.thumbnail_offset_secs,
      embedding_batch_size: config.embedding_batch_size,
      concurrency: config.concurrency,
      analysis_settings: config.analysis_settings(),
    }
  }
}

/// How one video ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VideoOutcome {
  Indexed { scenes: usize },
  Failed { step: Step, reason: String },
  /// Not attempted, e.g. no representative thumbnail could be made
  Skipped { reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
  /// One entry per input video, in input order
  pub videos: Vec<(PathBuf, VideoOutcome)>,
}

impl BatchSummary {
  pub fn indexed(&self) -> usize {
    self.count(|o| matches!(o, VideoOutcome::Indexed { .. }))
  }

  pub fn failed(&self) -> usize {
    self.count(|o| matches!(o, VideoOutcome::Failed { .. }))
  }

  pub fn skipped(&self) -> usize {
    self.count(|o| matches!(o, VideoOutcome::Skipped { .. }))
  }

  pub fn outcome(&self, video: &Path) -> Option<&VideoOutcome> {
    self.videos.iter().find(|(p, _)| p == video).map(|(_, o)| o)
  }

  fn count(&self, pred: impl Fn(&VideoOutcome) -> bool) -> usize {
    self.videos.iter().filter(|(_, o)| pred(o)).count()
  }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Clone)]
pub struct IndexingPipeline {
  worker: Arc<dyn AnalysisWorker>,
  store: Arc<dyn VectorStore>,
  thumbnailer: Arc<dyn Thumbnailer>,
  progress: ProgressBroadcast,
  options: Arc<PipelineOptions>,
}

impl IndexingPipeline {
  pub fn new(
    worker: Arc<dyn AnalysisWorker>,
    store: Arc<dyn VectorStore>,
    thumbnailer: Arc<dyn Thumbnailer>,
    progress: ProgressBroadcast,
    options: PipelineOptions,
  ) -> Self {
    Self {
      worker,
      store,
      thumbnailer,
      progress,
      options: Arc::new(options),
    }
  }

  /// Index `videos`. Never fails as a whole; per-video results are in the summary.
  pub async fn run(&self, videos: &[PathBuf]) -> BatchSummary {
    let concurrency = self.options.concurrency.max(1);
    info!(videos = videos.len(), concurrency, "Indexing batch started");

    let results: Vec<(PathBuf, VideoOutcome)> = futures::stream::iter(videos.iter().cloned())
      .map(|video| async move {
        let outcome = self.process_video(&video).await;
        (video, outcome)
      })
      .buffered(concurrency)
      .collect()
      .await;

    let summary = BatchSummary { videos: results };
    info!(
      indexed = summary.indexed(),
      failed = summary.failed(),
      skipped = summary.skipped(),
      "Indexing batch finished"
    );
    summary
  }

  /// Re-run face matching over everything the worker has stored.
  pub async fn reindex_faces(&self, progress: Option<mpsc::Sender<String>>) -> Result<Value, WorkerError> {
    self.worker.reindex_faces(progress).await
  }

  /// Drive one video through every stage it still needs.
  pub async fn process_video(&self, video: &Path) -> VideoOutcome {
    let job = VideoJob::new(video, &self.options.output_dir);
    if let Err(e) = job.ensure_dir().await {
      warn!(video = %video.display(), "Cannot create working directory: {e}");
      return VideoOutcome::Skipped { reason: e.to_string() };
    }

    let checkpoints = job.probe().await;
    debug!(video = %video.display(), ?checkpoints, "Checkpoints probed");

    let thumbnail_url = match self.prime_thumbnail(video).await {
      Ok(path) => file_url(&path),
      Err(e) if self.options.require_thumbnail => {
        warn!(video = %video.display(), "Skipping video, thumbnail failed: {e}");
        return VideoOutcome::Skipped {
          reason: format!("thumbnail: {e}"),
        };
      }
      Err(e) => {
        warn!(video = %video.display(), "Continuing without thumbnail: {e}");
        String::new()
      }
    };

    let events = VideoProgress {
      broadcast: &self.progress,
      video: video.to_string_lossy().into_owned(),
      thumbnail_url,
    };

    if checkpoints.all_done() {
      debug!(video = %video.display(), "All checkpoints present");
      events.emit(Step::Transcription, 100, true);
      events.emit(Step::FrameAnalysis, 100, true);
    } else {
      if !checkpoints.transcription_done
        && let Err(e) = self.run_transcription(&job, &events).await
      {
        return failed(video, Step::Transcription, e);
      }
      if !checkpoints.analysis_done
        && let Err(e) = self.run_analysis(&job, &events).await
      {
        return failed(video, Step::FrameAnalysis, e);
      }
    }

    events.emit(Step::Embedding, 0, true);
    match self.run_embedding(&job, checkpoints.scenes_done).await {
      Ok(count) => {
        events.emit(Step::Embedding, 100, true);
        info!(video = %video.display(), scenes = count, "Video indexed");
        VideoOutcome::Indexed { scenes: count }
      }
      Err(e) => {
        events.emit(Step::Embedding, 100, false);
        failed(video, Step::Embedding, e)
      }
    }
  }

  async fn prime_thumbnail(&self, video: &Path) -> Result<PathBuf, ThumbnailError> {
    let output = video_thumbnail_path(&self.options.thumbnails_dir, video);
    ensure_thumbnail(
      self.thumbnailer.as_ref(),
      video,
      self.options.thumbnail_offset_secs,
      &output,
    )
    .await
  }

  async fn run_transcription(&self, job: &VideoJob, events: &VideoProgress<'_>) -> Result<(), PipelineError> {
    events.emit(Step::Transcription, 0, true);

    let staging = job.transcription_staging_path();
    let (tx, rx) = mpsc::channel(32);
    let work = async {
      self.worker.transcribe(&job.source, &staging, Some(tx)).await?;
      let transcription: Transcription = read_json(&staging).await?;
      write_json_atomic(&job.transcription_path(), &transcription).await?;
      let _ = tokio::fs::remove_file(&staging).await;
      Ok::<_, PipelineError>(())
    };

    let (result, ()) = tokio::join!(work, events.forward(Step::Transcription, rx));
    events.emit(Step::Transcription, 100, result.is_ok());
    result
  }

  async fn run_analysis(&self, job: &VideoJob, events: &VideoProgress<'_>) -> Result<(), PipelineError> {
    events.emit(Step::FrameAnalysis, 0, true);

    let (tx, rx) = mpsc::channel(32);
    let work = async {
      let analysis = self
        .worker
        .analyze(&job.source, self.options.analysis_settings.as_ref(), Some(tx))
        .await?;
      write_json_atomic(&job.analysis_path(), &analysis).await?;
      Ok::<_, PipelineError>(())
    };

    let (result, ()) = tokio::join!(work, events.forward(Step::FrameAnalysis, rx));
    events.emit(Step::FrameAnalysis, 100, result.is_ok());
    result
  }

  /// Load or synthesize the video's scenes, attach thumbnails and submit them to the store.
  async fn run_embedding(&self, job: &VideoJob, scenes_done: bool) -> Result<usize, PipelineError> {
    let (mut scenes, category) = self.load_scenes(job, scenes_done).await?;

    for scene in &mut scenes {
      let output = scene_thumbnail_path(&self.options.thumbnails_dir, &job.source, scene.start_time);
      scene.thumbnail_url = match ensure_thumbnail(self.thumbnailer.as_ref(), &job.source, scene.start_time, &output).await
      {
        Ok(path) => file_url(&path),
        Err(e) => {
          debug!(video = %job.source.display(), start = scene.start_time, "No scene thumbnail: {e}");
          String::new()
        }
      };
    }

    let documents: Vec<SceneDocument> = scenes
      .iter()
      .map(|scene| SceneDocument::from_scene(scene, &category))
      .collect();

    for batch in documents.chunks(self.options.embedding_batch_size.max(1)) {
      self.store.add(batch).await?;
    }

    Ok(scenes.len())
  }

  async fn load_scenes(&self, job: &VideoJob, scenes_done: bool) -> Result<(Vec<Scene>, String), PipelineError> {
    if scenes_done {
      let scenes: Vec<Scene> = read_json(&job.scenes_path()).await?;
      let category = match read_json::<VideoAnalysis>(&job.analysis_path()).await {
        Ok(analysis) => analysis.category().to_string(),
        Err(e) => {
          debug!(video = %job.source.display(), "No category available: {e}");
          UNKNOWN_CATEGORY.to_string()
        }
      };
      return Ok((scenes, category));
    }

    let transcription: Transcription = read_json(&job.transcription_path()).await?;
    let analysis: VideoAnalysis = read_json(&job.analysis_path()).await?;
    let scenes = synthesize(&job.source, &transcription, &analysis);
    write_json_atomic(&job.scenes_path(), &scenes).await?;
    debug!(video = %job.source.display(), scenes = scenes.len(), "Scenes synthesized");

    Ok((scenes, analysis.category().to_string()))
  }
}

fn failed(video: &Path, step: Step, error: PipelineError) -> VideoOutcome {
  warn!(video = %video.display(), %step, "Stage failed: {error}");
  VideoOutcome::Failed {
    step,
    reason: error.to_string(),
  }
}

/// Progress emitter bound to one video.
struct VideoProgress<'a> {
  broadcast: &'a ProgressBroadcast,
  video: String,
  thumbnail_url: String,
}

impl VideoProgress<'_> {
  fn emit(&self, step: Step, progress: u8, success: bool) {
    self.broadcast.emit(ProgressEvent::new(
      self.video.clone(),
      step,
      progress,
      success,
      self.thumbnail_url.clone(),
    ));
  }

  /// Relay worker percentages as intermediate (1-99%) events until the sender is dropped.
  async fn forward(&self, step: Step, mut rx: mpsc::Receiver<u8>) {
    let mut last = None;
    while let Some(pct) = rx.recv().await {
      let pct = pct.clamp(1, 99);
      if last != Some(pct) {
        self.emit(step, pct, true);
        last = Some(pct);
      }
    }
  }
}

#[cfg(test)]
mod __tests__;

//! Test helpers for pipeline scenario tests.
//!
//! Provides `PipelineTestContext`, which manages temporary directories and
//! wires an `IndexingPipeline` to in-memory fakes for the worker, the
//! thumbnailer and the vector store.

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::{
  domain::artifacts::{Transcription, VideoAnalysis},
  ipc::RequestKind,
  pipeline::{
    IndexingPipeline, PipelineOptions, SceneDocument, StoreError, ThumbnailError, Thumbnailer, VectorStore, VideoJob,
    write_json_atomic,
  },
  progress::{ProgressBroadcast, ProgressEvent, Step},
  worker::{AnalysisWorker, WorkerError},
};

// ============================================================================
// Fakes
// ============================================================================

/// In-memory worker. Succeeds unless told which videos to fail.
pub struct FakeWorker {
  pub transcribe_calls: AtomicUsize,
  pub analyze_calls: AtomicUsize,
  transcription: Transcription,
  analysis: VideoAnalysis,
  progress: Vec<u8>,
  fail_analysis: HashSet<String>,
  analysis_error: WorkerError,
}

impl FakeWorker {
  pub fn new() -> Self {
    Self {
      transcribe_calls: AtomicUsize::new(0),
      analyze_calls: AtomicUsize::new(0),
      transcription: sample_transcription(),
      analysis: sample_analysis(),
      progress: Vec::new(),
      fail_analysis: HashSet::new(),
      analysis_error: WorkerError::Remote {
        message: "decoder crashed".to_string(),
      },
    }
  }

  /// Report these percentages during each request
  pub fn with_progress(mut self, steps: &[u8]) -> Self {
    self.progress = steps.to_vec();
    self
  }

  pub fn with_analysis(mut self, analysis: VideoAnalysis) -> Self {
    self.analysis = analysis;
    self
  }

  /// Fail frame analysis for the video with this file name
  pub fn failing_analysis(mut self, file_name: &str, error: WorkerError) -> Self {
    self.fail_analysis.insert(file_name.to_string());
    self.analysis_error = error;
    self
  }

  pub fn calls(&self) -> usize {
    self.transcribe_calls.load(Ordering::SeqCst) + self.analyze_calls.load(Ordering::SeqCst)
  }

  async fn report(&self, progress: &Option<mpsc::Sender<u8>>) {
    if let Some(tx) = progress {
      for pct in &self.progress {
        let _ = tx.send(*pct).await;
      }
    }
  }
}

#[async_trait::async_trait]
impl AnalysisWorker for FakeWorker {
  async fn transcribe(
    &self,
    _video: &Path,
    output_json: &Path,
    progress: Option<mpsc::Sender<u8>>,
  ) -> Result<(), WorkerError> {
    self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
    self.report(&progress).await;
    let bytes = serde_json::to_vec(&self.transcription).expect("serialize transcription");
    tokio::fs::write(output_json, bytes).await.expect("write transcription");
    Ok(())
  }

  async fn analyze(
    &self,
    video: &Path,
    _settings: Option<&Value>,
    progress: Option<mpsc::Sender<u8>>,
  ) -> Result<VideoAnalysis, WorkerError> {
    self.analyze_calls.fetch_add(1, Ordering::SeqCst);
    self.report(&progress).await;

    let name = video.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    if self.fail_analysis.contains(&name) {
      return Err(self.analysis_error.clone());
    }

    let mut analysis = self.analysis.clone();
    analysis.video_file = video.to_string_lossy().into_owned();
    Ok(analysis)
  }

  async fn reindex_faces(&self, progress: Option<mpsc::Sender<String>>) -> Result<Value, WorkerError> {
    if let Some(tx) = progress {
      let _ = tx.send("Re-matched 2 faces".to_string()).await;
    }
    Ok(json!({ "status": "ok" }))
  }

  async fn health(&self) -> Result<String, WorkerError> {
    Ok("ready".to_string())
  }
}

/// Writes a placeholder JPEG, or always fails.
pub struct FakeThumbnailer {
  pub calls: AtomicUsize,
  fail: bool,
}

impl FakeThumbnailer {
  pub fn working() -> Self {
    Self {
      calls: AtomicUsize::new(0),
      fail: false,
    }
  }

  pub fn broken() -> Self {
    Self {
      calls: AtomicUsize::new(0),
      fail: true,
    }
  }
}

#[async_trait::async_trait]
impl Thumbnailer for FakeThumbnailer {
  async fn generate(&self, _video: &Path, _at_secs: f64, output: &Path) -> Result<(), ThumbnailError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(ThumbnailError::Extraction {
        status: "exit status: 1".to_string(),
        stderr: "moov atom not found".to_string(),
      });
    }
    tokio::fs::write(output, b"jpeg").await?;
    Ok(())
  }
}

/// Records every batch it receives.
#[derive(Default)]
pub struct MemoryStore {
  pub batches: Mutex<Vec<Vec<SceneDocument>>>,
}

impl MemoryStore {
  pub fn batch_sizes(&self) -> Vec<usize> {
    self.batches.lock().unwrap().iter().map(Vec::len).collect()
  }

  pub fn documents(&self) -> Vec<SceneDocument> {
    self.batches.lock().unwrap().iter().flatten().cloned().collect()
  }
}

#[async_trait::async_trait]
impl VectorStore for MemoryStore {
  async fn add(&self, documents: &[SceneDocument]) -> Result<(), StoreError> {
    self.batches.lock().unwrap().push(documents.to_vec());
    Ok(())
  }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn sample_transcription() -> Transcription {
  serde_json::from_value(json!({
    "text": "welcome to the lake",
    "language": "en",
    "segments": [{
      "start": 0.0, "end": 3.5, "text": "welcome to the lake",
      "words": [
        { "word": " welcome", "start": 0.4, "end": 0.9, "probability": 0.99 },
        { "word": " to", "start": 1.0, "end": 1.1, "probability": 0.98 },
        { "word": " the", "start": 2.2, "end": 2.3, "probability": 0.97 },
        { "word": " lake", "start": 2.5, "end": 3.0, "probability": 0.95 }
      ]
    }]
  }))
  .expect("valid transcription")
}

pub fn sample_analysis() -> VideoAnalysis {
  analysis_with_frames(2)
}

/// Analysis with `count` consecutive two-second frames
pub fn analysis_with_frames(count: usize) -> VideoAnalysis {
  let frames: Vec<Value> = (0..count)
    .map(|i| {
      let start = i as f64 * 2000.0;
      json!({
        "start_time_ms": start,
        "end_time_ms": start + 2000.0,
        "faces": [{ "name": "Ana", "emotion": "happy" }],
        "objects": [{ "label": "boat", "confidence": 0.8 }],
        "shot_type": "long-shot",
        "dominant_color": { "name": "teal", "hex": "#008080" }
      })
    })
    .collect();

  serde_json::from_value(json!({
    "video_file": "",
    "scene_analysis": { "environment": "aquatic" },
    "frame_analysis": frames,
    "summary": { "total_frames": count }
  }))
  .expect("valid analysis")
}

// ============================================================================
// Context
// ============================================================================

pub struct PipelineTestContext {
  pub root: TempDir,
  pub options: PipelineOptions,
}

impl PipelineTestContext {
  pub fn new() -> Self {
    let root = TempDir::new().expect("create temp dir");
    let options = PipelineOptions {
      output_dir: root.path().join("analysis"),
      thumbnails_dir: root.path().join("thumbnails"),
      require_thumbnail: true,
      thumbnail_offset_secs: 1.0,
      embedding_batch_size: 50,
      concurrency: 1,
      analysis_settings: None,
    };
    Self { root, options }
  }

  /// Create an (empty) video file; `name` may include subfolders
  pub fn video(&self, name: &str) -> PathBuf {
    let path = self.root.path().join("videos").join(name);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).expect("create videos dir");
    }
    std::fs::write(&path, b"").expect("create video");
    path
  }

  pub fn job(&self, video: &Path) -> VideoJob {
    VideoJob::new(video, &self.options.output_dir)
  }

  pub fn pipeline(
    &self,
    worker: Arc<FakeWorker>,
    store: Arc<MemoryStore>,
    thumbnailer: Arc<FakeThumbnailer>,
  ) -> (IndexingPipeline, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (progress, rx) = ProgressBroadcast::new();
    let pipeline = IndexingPipeline::new(worker, store, thumbnailer, progress, self.options.clone());
    (pipeline, rx)
  }

  /// Write the transcription and analysis checkpoints (and optionally scenes) for a video
  pub async fn seed_checkpoints(&self, video: &Path, with_scenes: bool) {
    let job = self.job(video);
    job.ensure_dir().await.expect("create work dir");
    write_json_atomic(&job.transcription_path(), &sample_transcription())
      .await
      .expect("seed transcription");
    write_json_atomic(&job.analysis_path(), &sample_analysis())
      .await
      .expect("seed analysis");
    if with_scenes {
      let scenes = crate::pipeline::synthesize(video, &sample_transcription(), &sample_analysis());
      write_json_atomic(&job.scenes_path(), &scenes).await.expect("seed scenes");
    }
  }
}

/// Drain everything emitted so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}

/// `(step, progress, success)` triples for the given video
pub fn steps_for(events: &[ProgressEvent], video: &Path) -> Vec<(Step, u8, bool)> {
  let video = video.to_string_lossy();
  events
    .iter()
    .filter(|e| e.video == video)
    .map(|e| (e.step, e.progress, e.success))
    .collect()
}

pub fn timeout_error() -> WorkerError {
  WorkerError::RequestTimeout {
    kind: RequestKind::Analyze,
    timeout: Duration::from_secs(7200),
  }
}

//! Progress events emitted by the indexing pipeline.
//!
//! Events are self-contained so a consumer can render them without keeping
//! per-video state. Emission never blocks: the broadcast is an unbounded mpsc
//! and a dropped receiver is ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Pipeline stage a progress event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
  Transcription,
  FrameAnalysis,
  Embedding,
}

impl Step {
  /// Every stage in pipeline order
  pub const ALL: [Step; 3] = [Step::Transcription, Step::FrameAnalysis, Step::Embedding];

  pub fn index(self) -> u8 {
    match self {
      Self::Transcription => 0,
      Self::FrameAnalysis => 1,
      Self::Embedding => 2,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Transcription => "transcription",
      Self::FrameAnalysis => "frame-analysis",
      Self::Embedding => "embedding",
    }
  }
}

impl std::fmt::Display for Step {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
  pub video: String,
  pub step: Step,
  /// 0-100
  pub progress: u8,
  pub success: bool,
  pub step_index: u8,
  /// `file://` URL of the video's representative thumbnail, or empty
  pub thumbnail_url: String,
}

impl ProgressEvent {
  pub fn new(video: impl Into<String>, step: Step, progress: u8, success: bool, thumbnail_url: impl Into<String>) -> Self {
    Self {
      video: video.into(),
      step,
      progress: progress.min(100),
      success,
      step_index: step.index(),
      thumbnail_url: thumbnail_url.into(),
    }
  }

  /// A 100% event, i.e. the stage finished one way or the other
  pub fn is_terminal(&self) -> bool {
    self.progress == 100
  }
}

/// Sender side of the progress stream. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProgressBroadcast {
  tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressBroadcast {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx: Some(tx) }, rx)
  }

  /// A broadcast with no listener
  pub fn disabled() -> Self {
    Self::default()
  }

  pub fn emit(&self, event: ProgressEvent) {
    if let Some(tx) = &self.tx {
      let _ = tx.send(event);
    }
  }
}

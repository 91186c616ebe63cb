//! Checkpoint artifacts written per video.
//!
//! `Transcription` and `VideoAnalysis` mirror what the worker produces. Fields
//! the indexer does not interpret are kept in `extra` so a rewritten artifact
//! loses nothing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Category used when the analysis carries no environment classification.
pub const UNKNOWN_CATEGORY: &str = "unknown";

// ============================================================================
// Transcription
// ============================================================================

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
  #[serde(default)]
  pub text: String,
  pub language: Option<String>,
  #[serde(default)]
  pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
  pub start: f64,
  pub end: f64,
  #[serde(default)]
  pub text: String,
  #[serde(default)]
  pub words: Vec<Word>,
}

/// A single timed word, times in seconds.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Word {
  pub word: String,
  pub start: f64,
  pub end: f64,
  pub probability: Option<f64>,
}

impl Transcription {
  pub fn words(&self) -> impl Iterator<Item = &Word> {
    self.segments.iter().flat_map(|s| s.words.iter())
  }
}

// ============================================================================
// Frame analysis
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysis {
  #[serde(default)]
  pub video_file: String,
  #[serde(default)]
  pub frame_analysis: Vec<Frame>,
  #[serde(default)]
  pub scene_analysis: SceneAnalysis,
  #[serde(default)]
  pub summary: Value,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl VideoAnalysis {
  /// Environment classification of the whole video
  pub fn category(&self) -> &str {
    self
      .scene_analysis
      .environment
      .as_deref()
      .filter(|env| !env.is_empty())
      .unwrap_or(UNKNOWN_CATEGORY)
  }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneAnalysis {
  pub environment: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// One sampled span of the video.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
  pub start_time_ms: f64,
  pub end_time_ms: f64,
  #[serde(default)]
  pub faces: Vec<Face>,
  #[serde(default)]
  pub objects: Vec<DetectedObject>,
  pub shot_type: Option<String>,
  /// Either a color name or an object with a `name` field
  pub dominant_color: Option<Value>,
  /// Either a list of strings or a list of objects with a `text` field
  pub detected_text: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Frame {
  pub fn start_secs(&self) -> f64 {
    self.start_time_ms / 1000.0
  }

  pub fn end_secs(&self) -> f64 {
    self.end_time_ms / 1000.0
  }

  pub fn dominant_color_name(&self) -> Option<String> {
    match self.dominant_color.as_ref()? {
      Value::String(name) => Some(name.clone()),
      Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
      _ => None,
    }
  }

  pub fn detected_text(&self) -> Vec<String> {
    let Some(Value::Array(items)) = self.detected_text.as_ref() else {
      return Vec::new();
    };

    items
      .iter()
      .filter_map(|item| match item {
        Value::String(text) => Some(text.clone()),
        Value::Object(obj) => obj.get("text").and_then(Value::as_str).map(str::to_string),
        _ => None,
      })
      .filter(|text| !text.trim().is_empty())
      .collect()
  }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Face {
  #[serde(default)]
  pub name: String,
  /// Either a label or a map of label to score
  pub emotion: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Face {
  /// The detected emotion; for a score map, the highest-scoring label
  pub fn emotion_label(&self) -> Option<String> {
    match self.emotion.as_ref()? {
      Value::String(label) if !label.is_empty() => Some(label.clone()),
      Value::Object(scores) => scores
        .iter()
        .filter_map(|(label, score)| score.as_f64().map(|s| (label, s)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(label, _)| label.clone()),
      _ => None,
    }
  }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
  pub label: String,
  pub confidence: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

// ============================================================================
// Scenes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceEmotion {
  pub name: String,
  pub emotion: String,
}

/// A searchable span of a video, synthesized from the two analysis artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
  pub id: String,
  pub source: String,
  /// Seconds
  pub start_time: f64,
  pub end_time: f64,
  pub faces: Vec<String>,
  pub objects: Vec<String>,
  pub emotions: Vec<FaceEmotion>,
  pub shot_type: String,
  pub environment: String,
  pub dominant_color: String,
  pub detected_text: Vec<String>,
  pub transcription: String,
  pub thumbnail_url: String,
}

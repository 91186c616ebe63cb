//! Scene synthesis: one scene per analyzed frame span, with the words spoken
//! during it.

use std::path::Path;

use super::thumbnail::scene_key;
use crate::domain::artifacts::{FaceEmotion, Frame, Scene, Transcription, VideoAnalysis, Word};

/// Build scenes from a video's transcription and frame analysis.
pub fn synthesize(source: &Path, transcription: &Transcription, analysis: &VideoAnalysis) -> Vec<Scene> {
  let category = analysis.category();
  let words: Vec<&Word> = transcription.words().collect();

  analysis
    .frame_analysis
    .iter()
    .map(|frame| build_scene(source, frame, &words, category))
    .collect()
}

/// A word belongs to a frame when the whole second it starts in lies within
/// `[floor(frame start), ceil(frame end))`.
pub fn word_in_frame(word: &Word, frame_start: f64, frame_end: f64) -> bool {
  let second = word.start.floor();
  second >= frame_start.floor() && second < frame_end.ceil()
}

fn build_scene(source: &Path, frame: &Frame, words: &[&Word], category: &str) -> Scene {
  let start = frame.start_secs();
  let end = frame.end_secs();

  let transcription = words
    .iter()
    .filter(|w| word_in_frame(w, start, end))
    .map(|w| w.word.trim())
    .filter(|w| !w.is_empty())
    .collect::<Vec<_>>()
    .join(" ");

  let mut faces = Vec::new();
  let mut emotions = Vec::new();
  for face in &frame.faces {
    let name = face.name.trim();
    if name.is_empty() {
      continue;
    }
    push_unique(&mut faces, name);
    if let Some(emotion) = face.emotion_label() {
      let pair = FaceEmotion {
        name: name.to_string(),
        emotion,
      };
      if !emotions.contains(&pair) {
        emotions.push(pair);
      }
    }
  }

  let mut objects = Vec::new();
  for object in &frame.objects {
    let label = object.label.trim();
    if !label.is_empty() {
      push_unique(&mut objects, label);
    }
  }

  Scene {
    id: scene_key(source, start),
    source: source.to_string_lossy().into_owned(),
    start_time: start,
    end_time: end,
    faces,
    objects,
    emotions,
    shot_type: frame.shot_type.clone().unwrap_or_default(),
    environment: category.to_string(),
    dominant_color: frame.dominant_color_name().unwrap_or_default(),
    detected_text: frame.detected_text(),
    transcription,
    thumbnail_url: String::new(),
  }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
  if !list.iter().any(|existing| existing == item) {
    list.push(item.to_string());
  }
}

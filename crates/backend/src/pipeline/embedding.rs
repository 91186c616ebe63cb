//! Vector store boundary.
//!
//! The pipeline hands each scene to the store as a natural-language
//! description plus flat scalar metadata; embedding the description is the
//! store's concern. [`FileVectorStore`] appends documents to a JSON-lines file
//! for stores that ingest offline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tracing::debug;

use crate::domain::artifacts::Scene;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Serialization error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("Vector store error: {0}")]
  Backend(String),
}

/// One scene as submitted to the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
  pub id: String,
  pub description: String,
  /// Scalar values only (strings, numbers, booleans)
  pub metadata: Map<String, Value>,
}

impl SceneDocument {
  pub fn from_scene(scene: &Scene, category: &str) -> Self {
    Self {
      id: scene.id.clone(),
      description: describe(scene),
      metadata: scalar_metadata(scene, category),
    }
  }
}

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
  /// Embed and store a batch of documents, replacing any with the same id.
  async fn add(&self, documents: &[SceneDocument]) -> Result<(), StoreError>;
}

/// Flatten a scene into the scalar metadata a vector store can filter on.
pub fn scalar_metadata(scene: &Scene, category: &str) -> Map<String, Value> {
  let emotions = scene
    .emotions
    .iter()
    .map(|e| format!("{}:{}", e.name, e.emotion))
    .collect::<Vec<_>>()
    .join(", ");

  let mut metadata = Map::new();
  metadata.insert("source".into(), Value::from(scene.source.clone()));
  metadata.insert("start_time".into(), Value::from(scene.start_time));
  metadata.insert("end_time".into(), Value::from(scene.end_time));
  metadata.insert("faces".into(), Value::from(scene.faces.join(", ")));
  metadata.insert("objects".into(), Value::from(scene.objects.join(", ")));
  metadata.insert("emotions".into(), Value::from(emotions));
  metadata.insert("shot_type".into(), Value::from(scene.shot_type.clone()));
  metadata.insert("environment".into(), Value::from(scene.environment.clone()));
  metadata.insert("category".into(), Value::from(category));
  metadata.insert("dominant_color".into(), Value::from(scene.dominant_color.clone()));
  metadata.insert("detected_text".into(), Value::from(scene.detected_text.join(", ")));
  metadata.insert("transcription".into(), Value::from(scene.transcription.clone()));
  metadata.insert("thumbnail_url".into(), Value::from(scene.thumbnail_url.clone()));
  metadata
}

/// Describe a scene in a sentence or few, for embedding.
pub fn describe(scene: &Scene) -> String {
  let mut parts = Vec::new();

  let shot = if scene.shot_type.is_empty() {
    "scene".to_string()
  } else {
    format!("{} scene", scene.shot_type.replace('-', " "))
  };
  if scene.environment.is_empty() || scene.environment == crate::domain::artifacts::UNKNOWN_CATEGORY {
    parts.push(format!("A {shot}."));
  } else {
    parts.push(format!("A {shot} in a {} setting.", scene.environment.replace('_', " ")));
  }

  if !scene.faces.is_empty() {
    let people: Vec<String> = scene
      .faces
      .iter()
      .map(|name| match scene.emotions.iter().find(|e| &e.name == name) {
        Some(e) => format!("{name} ({})", e.emotion),
        None => name.clone(),
      })
      .collect();
    parts.push(format!("People: {}.", people.join(", ")));
  }
  if !scene.objects.is_empty() {
    parts.push(format!("Objects: {}.", scene.objects.join(", ")));
  }
  if !scene.dominant_color.is_empty() {
    parts.push(format!("Dominant color: {}.", scene.dominant_color));
  }
  if !scene.detected_text.is_empty() {
    parts.push(format!("On-screen text: {}.", scene.detected_text.join(", ")));
  }
  if !scene.transcription.is_empty() {
    parts.push(format!("Dialogue: \"{}\"", scene.transcription));
  }

  parts.join(" ")
}

/// Appends documents to a JSON-lines file, one document per line.
#[derive(Debug)]
pub struct FileVectorStore {
  path: PathBuf,
  write_lock: Mutex<()>,
}

impl FileVectorStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      write_lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Read every stored document, later lines replacing earlier ones with the same id
  pub async fn load(&self) -> Result<Vec<SceneDocument>, StoreError> {
    let content = match tokio::fs::read_to_string(&self.path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut documents: Vec<SceneDocument> = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
      let doc: SceneDocument = serde_json::from_str(line)?;
      match documents.iter_mut().find(|d| d.id == doc.id) {
        Some(existing) => *existing = doc,
        None => documents.push(doc),
      }
    }
    Ok(documents)
  }
}

#[async_trait::async_trait]
impl VectorStore for FileVectorStore {
  async fn add(&self, documents: &[SceneDocument]) -> Result<(), StoreError> {
    if documents.is_empty() {
      return Ok(());
    }

    let mut buf = Vec::new();
    for doc in documents {
      serde_json::to_writer(&mut buf, doc)?;
      buf.push(b'\n');
    }

    let _guard = self.write_lock.lock().await;
    if let Some(parent) = self.path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .await?;
    file.write_all(&buf).await?;
    file.flush().await?;

    debug!(path = %self.path.display(), count = documents.len(), "Stored scene documents");
    Ok(())
  }
}

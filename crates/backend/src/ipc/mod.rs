//! IPC module - host/worker transport and wire types
//!
//! The worker speaks newline-delimited JSON envelopes of the shape
//! `{ "id": "...", "type": "...", "payload": { ... } }`. The `id` field
//! correlates responses with the request that produced them, so several
//! requests (even of the same type) can be in flight on one connection.
use serde::{Deserialize, Serialize};

pub mod channel;
pub mod endpoint;

pub use channel::{MessageChannel, ResponseStream};
pub use endpoint::{Endpoint, EndpointResolver};

#[derive(Debug, Clone, thiserror::Error)]
pub enum IpcError {
  #[error("Ser/de error: {0}")]
  Serde(String),
  #[error("IO error: {0}")]
  Io(String),
  #[error("Codec error: {0}")]
  Codec(String),
  #[error("Connection error: {0}")]
  Connection(String),
  #[error("Channel closed")]
  ChannelClosed,
  #[error("Transport not supported on this platform: {0}")]
  Unsupported(&'static str),
}

impl From<serde_json::Error> for IpcError {
  fn from(err: serde_json::Error) -> Self {
    IpcError::Serde(err.to_string())
  }
}

impl From<std::io::Error> for IpcError {
  fn from(err: std::io::Error) -> Self {
    IpcError::Io(err.to_string())
  }
}

impl From<tokio_util::codec::LinesCodecError> for IpcError {
  fn from(err: tokio_util::codec::LinesCodecError) -> Self {
    IpcError::Codec(err.to_string())
  }
}

// ============================================================================
// Envelope
// ============================================================================

/// A single protocol frame, in either direction.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
  /// Correlation id; echoed back by the worker on every response
  pub id: Option<String>,
  /// Message type, e.g. `analyze` or `analysis_progress`
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub payload: serde_json::Value,
}

impl Envelope {
  pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
    Self {
      id: None,
      kind: kind.into(),
      payload,
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  /// Human readable error text carried by an error payload.
  ///
  /// Workers use either `message` or `error` for this.
  pub fn error_message(&self) -> String {
    self
      .payload
      .get("message")
      .or_else(|| self.payload.get("error"))
      .and_then(|v| v.as_str())
      .map(str::to_string)
      .unwrap_or_else(|| format!("{} (no message)", self.kind))
  }
}

// ============================================================================
// Request kinds
// ============================================================================

/// Generic error type the worker uses when it cannot attribute a failure
/// (unknown message type, invalid JSON).
pub const GENERIC_ERROR: &str = "error";

/// The logical requests the host can issue, with the response types each expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
  Transcribe,
  Analyze,
  ReindexFaces,
  Health,
}

impl RequestKind {
  /// Type string sent on the wire
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Transcribe => "transcribe",
      Self::Analyze => "analyze",
      Self::ReindexFaces => "reindex_faces",
      Self::Health => "health",
    }
  }

  /// Non-terminal response types
  pub fn progress_types(self) -> &'static [&'static str] {
    match self {
      Self::Transcribe => &["transcription_progress", "transcription_message"],
      Self::Analyze => &["analysis_progress"],
      Self::ReindexFaces => &["reindex_progress"],
      Self::Health => &[],
    }
  }

  /// Terminal response type on success
  pub fn success_type(self) -> &'static str {
    match self {
      Self::Transcribe => "transcription_complete",
      Self::Analyze => "analysis_result",
      Self::ReindexFaces => "reindex_complete",
      Self::Health => "status",
    }
  }

  /// Terminal response type on failure
  pub fn error_type(self) -> &'static str {
    match self {
      Self::Transcribe => "transcription_error",
      Self::Analyze => "analysis_error",
      Self::ReindexFaces => "reindex_error",
      Self::Health => GENERIC_ERROR,
    }
  }

  /// Whether a response of type `kind` ends this request
  pub fn is_terminal(self, kind: &str) -> bool {
    kind == self.success_type() || kind == self.error_type() || kind == GENERIC_ERROR
  }
}

impl std::fmt::Display for RequestKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

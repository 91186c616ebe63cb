//! Typed requests to the analysis worker.

use std::{path::Path, time::Duration};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::{Supervisor, WorkerError};
use crate::{
  domain::{artifacts::VideoAnalysis, config::WorkerConfig},
  ipc::{Envelope, IpcError, MessageChannel, RequestKind},
};

/// What the indexing pipeline needs from a worker.
///
/// Progress senders receive percentages (0-100); sends never block, so a slow
/// consumer only misses intermediate updates.
#[async_trait::async_trait]
pub trait AnalysisWorker: Send + Sync {
  /// Transcribe `video`; the worker writes the transcription JSON to `output_json`.
  async fn transcribe(
    &self,
    video: &Path,
    output_json: &Path,
    progress: Option<mpsc::Sender<u8>>,
  ) -> Result<(), WorkerError>;

  async fn analyze(
    &self,
    video: &Path,
    settings: Option<&Value>,
    progress: Option<mpsc::Sender<u8>>,
  ) -> Result<VideoAnalysis, WorkerError>;

  /// Re-match stored face encodings against the known-faces library.
  /// Progress receives the worker's output lines.
  async fn reindex_faces(&self, progress: Option<mpsc::Sender<String>>) -> Result<Value, WorkerError>;

  async fn health(&self) -> Result<String, WorkerError>;
}

/// [`AnalysisWorker`] backed by the supervisor's live channel.
///
/// Each call waits out a restart in progress (up to the startup timeout)
/// before issuing its request.
#[derive(Debug, Clone)]
pub struct WorkerClient {
  supervisor: Supervisor,
  request_timeout: Option<Duration>,
  ready_timeout: Duration,
}

impl WorkerClient {
  pub fn new(supervisor: Supervisor, request_timeout: Option<Duration>, ready_timeout: Duration) -> Self {
    Self {
      supervisor,
      request_timeout,
      ready_timeout,
    }
  }

  pub fn from_config(supervisor: Supervisor, config: &WorkerConfig) -> Self {
    Self::new(supervisor, config.request_timeout(), config.startup_timeout())
  }

  async fn channel(&self) -> Result<MessageChannel, WorkerError> {
    self.supervisor.wait_ready(self.ready_timeout).await
  }
}

#[async_trait::async_trait]
impl AnalysisWorker for WorkerClient {
  async fn transcribe(
    &self,
    video: &Path,
    output_json: &Path,
    progress: Option<mpsc::Sender<u8>>,
  ) -> Result<(), WorkerError> {
    let channel = self.channel().await?;
    let payload = json!({
      "video_path": video.to_string_lossy(),
      "json_file_path": output_json.to_string_lossy(),
    });

    exchange(&channel, RequestKind::Transcribe, payload, self.request_timeout, |env| match env.kind.as_str() {
      "transcription_progress" => report_percent(&progress, &env.payload),
      _ => {
        if let Some(message) = env.payload.get("message").and_then(Value::as_str) {
          info!(video = %video.display(), "{message}");
        }
      }
    })
    .await?;

    Ok(())
  }

  async fn analyze(
    &self,
    video: &Path,
    settings: Option<&Value>,
    progress: Option<mpsc::Sender<u8>>,
  ) -> Result<VideoAnalysis, WorkerError> {
    let channel = self.channel().await?;
    let mut payload = json!({ "video_path": video.to_string_lossy() });
    if let Some(settings) = settings {
      payload["settings"] = settings.clone();
    }

    let reply = exchange(&channel, RequestKind::Analyze, payload, self.request_timeout, |env| {
      if let Some(plugin) = env.payload.get("plugin").and_then(Value::as_str) {
        trace!(video = %video.display(), plugin, "Analysis progress");
      }
      report_percent(&progress, &env.payload);
    })
    .await?;

    serde_json::from_value(reply.payload).map_err(|e| WorkerError::Ipc(IpcError::from(e)))
  }

  async fn reindex_faces(&self, progress: Option<mpsc::Sender<String>>) -> Result<Value, WorkerError> {
    let channel = self.channel().await?;

    let reply = exchange(&channel, RequestKind::ReindexFaces, json!({}), self.request_timeout, |env| {
      if let Some(output) = env.payload.get("output").and_then(Value::as_str)
        && let Some(tx) = &progress
      {
        let _ = tx.try_send(output.to_string());
      }
    })
    .await?;

    Ok(reply.payload)
  }

  async fn health(&self) -> Result<String, WorkerError> {
    self.supervisor.health().await
  }
}

fn report_percent(progress: &Option<mpsc::Sender<u8>>, payload: &Value) {
  let Some(tx) = progress else {
    return;
  };
  if let Some(pct) = payload.get("progress").and_then(Value::as_f64) {
    let _ = tx.try_send(pct.clamp(0.0, 100.0).round() as u8);
  }
}

/// Issue one request and drive it to its terminal response.
///
/// Progress frames go to `on_progress`; the success response is returned and
/// any error response becomes [`WorkerError::Remote`]. The whole exchange is
/// bounded by `timeout` when set.
pub(crate) async fn exchange<F>(
  channel: &MessageChannel,
  kind: RequestKind,
  payload: Value,
  timeout: Option<Duration>,
  mut on_progress: F,
) -> Result<Envelope, WorkerError>
where
  F: FnMut(&Envelope) + Send,
{
  let mut responses = channel.request(kind, payload).await?;
  debug!(id = responses.id(), %kind, "Request sent");

  let drive = async {
    while let Some(reply) = responses.next().await {
      let envelope = reply?;

      if kind.is_terminal(&envelope.kind) {
        if envelope.kind == kind.success_type() {
          return Ok(envelope);
        }
        return Err(WorkerError::Remote {
          message: envelope.error_message(),
        });
      }

      if kind.progress_types().contains(&envelope.kind.as_str()) {
        on_progress(&envelope);
      } else {
        return Err(WorkerError::UnexpectedResponse {
          request: kind,
          received: envelope.kind,
        });
      }
    }

    Err(WorkerError::Ipc(IpcError::ChannelClosed))
  };

  match timeout {
    Some(limit) => tokio::time::timeout(limit, drive)
      .await
      .map_err(|_| WorkerError::RequestTimeout { kind, timeout: limit })?,
    None => drive.await,
  }
}

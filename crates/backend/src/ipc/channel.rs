//! Duplex message channel to one worker generation.
//!
//! A single multiplexer task owns the connection. Outbound frames are queued
//! through an mpsc channel; inbound frames are routed by correlation id to the
//! pending request that registered it. Frames with no id or an unknown id are
//! dropped. When the connection ends, every pending request receives
//! [`IpcError::ChannelClosed`] and the channel's `closed` token fires; this
//! layer never reconnects.

use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::{
  io::{AsyncRead, AsyncWrite},
  sync::mpsc,
};
use tokio_util::{
  codec::{Framed, LinesCodec, LinesCodecError},
  sync::CancellationToken,
};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use super::{Endpoint, Envelope, IpcError, RequestKind};

pub type Reply = Result<Envelope, IpcError>;

#[derive(Debug)]
struct PendingRequest {
  kind: RequestKind,
  tx: mpsc::UnboundedSender<Reply>,
}

type PendingMap = Arc<DashMap<String, PendingRequest>>;

/// Handle to an open connection. Cheap to clone; the connection closes when
/// [`MessageChannel::close`] is called, the peer hangs up, or every handle is dropped.
#[derive(Clone)]
pub struct MessageChannel {
  endpoint: Endpoint,
  outbound: mpsc::Sender<String>,
  pending: PendingMap,
  closed: CancellationToken,
}

impl std::fmt::Debug for MessageChannel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MessageChannel")
      .field("endpoint", &self.endpoint)
      .field("in_flight", &self.pending.len())
      .field("closed", &self.closed.is_cancelled())
      .finish()
  }
}

impl MessageChannel {
  /// Open a connection to the endpoint. Fails immediately if nothing is listening.
  pub async fn connect(endpoint: &Endpoint, max_frame_bytes: usize) -> Result<Self, IpcError> {
    match endpoint {
      #[cfg(unix)]
      Endpoint::UnixSocket(path) => {
        let stream = tokio::net::UnixStream::connect(path).await?;
        Ok(Self::spawn(stream, endpoint.clone(), max_frame_bytes))
      }
      #[cfg(not(unix))]
      Endpoint::UnixSocket(_) => Err(IpcError::Unsupported("unix domain sockets")),
      Endpoint::TcpPort(port) => {
        let stream = tokio::net::TcpStream::connect(("127.0.0.1", *port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self::spawn(stream, endpoint.clone(), max_frame_bytes))
      }
    }
  }

  fn spawn<S>(stream: S, endpoint: Endpoint, max_frame_bytes: usize) -> Self
  where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
  {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(max_frame_bytes));
    let (outbound, outbound_rx) = mpsc::channel(64);
    let pending: PendingMap = Arc::new(DashMap::new());
    let closed = CancellationToken::new();

    tokio::spawn(multiplexer(framed, outbound_rx, Arc::clone(&pending), closed.clone()));
    debug!(%endpoint, "Message channel open");

    Self {
      endpoint,
      outbound,
      pending,
      closed,
    }
  }

  pub fn endpoint(&self) -> &Endpoint {
    &self.endpoint
  }

  /// Send a request and get a stream of its responses.
  ///
  /// The stream yields progress frames followed by exactly one terminal frame
  /// (or an error if the connection drops), then ends.
  pub async fn request(&self, kind: RequestKind, payload: serde_json::Value) -> Result<ResponseStream, IpcError> {
    if self.closed.is_cancelled() {
      return Err(IpcError::ChannelClosed);
    }

    let id = Uuid::now_v7().to_string();
    let frame = serde_json::to_string(&Envelope::new(kind.as_str(), payload).with_id(id.clone()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    self.pending.insert(id.clone(), PendingRequest { kind, tx });

    // Constructed before sending so the pending entry is cleaned up on any early return
    let stream = ResponseStream {
      id,
      kind,
      rx,
      pending: Arc::clone(&self.pending),
    };

    trace!(id = %stream.id, %kind, "Sending request");
    self.outbound.send(frame).await.map_err(|_| IpcError::ChannelClosed)?;

    Ok(stream)
  }

  /// Number of requests awaiting a terminal response
  pub fn in_flight(&self) -> usize {
    self.pending.len()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }

  /// Resolves once the connection has been torn down
  pub async fn closed(&self) {
    self.closed.cancelled().await
  }

  /// Tear the connection down. Pending requests fail with `ChannelClosed`.
  pub fn close(&self) {
    self.closed.cancel();
  }
}

/// Responses for one request, in arrival order.
#[derive(Debug)]
pub struct ResponseStream {
  id: String,
  kind: RequestKind,
  rx: mpsc::UnboundedReceiver<Reply>,
  pending: PendingMap,
}

impl ResponseStream {
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn kind(&self) -> RequestKind {
    self.kind
  }

  /// Next response; `None` once the terminal response has been delivered.
  pub async fn next(&mut self) -> Option<Reply> {
    self.rx.recv().await
  }
}

impl Drop for ResponseStream {
  fn drop(&mut self) {
    // Late responses for an abandoned request (e.g. after a timeout) are dropped
    self.pending.remove(&self.id);
  }
}

// ============================================================================
// Multiplexer
// ============================================================================

async fn multiplexer<S>(
  framed: Framed<S, LinesCodec>,
  mut outbound_rx: mpsc::Receiver<String>,
  pending: PendingMap,
  closed: CancellationToken,
) where
  S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
  let (mut sink, mut stream) = framed.split();

  loop {
    tokio::select! {
      biased;

      _ = closed.cancelled() => {
        debug!("Channel closed locally");
        break;
      }

      frame = outbound_rx.recv() => {
        let Some(frame) = frame else {
          debug!("All channel handles dropped");
          break;
        };
        if let Err(e) = sink.send(frame).await {
          error!("Failed to write frame: {e}");
          break;
        }
      }

      result = stream.next() => {
        match result {
          Some(Ok(line)) => route(&pending, &line),
          Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
            warn!("Dropping oversized frame");
          }
          Some(Err(e)) => {
            error!("Connection error: {e}");
            break;
          }
          None => {
            debug!("Connection closed by worker");
            break;
          }
        }
      }
    }
  }

  closed.cancel();

  let ids: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
  for id in ids {
    if let Some((_, request)) = pending.remove(&id) {
      let _ = request.tx.send(Err(IpcError::ChannelClosed));
    }
  }

  debug!("Multiplexer exited");
}

/// Deliver one inbound frame to the request that owns it.
fn route(pending: &DashMap<String, PendingRequest>, line: &str) {
  let trimmed = line.trim();
  if trimmed.is_empty() {
    return;
  }

  let envelope: Envelope = match serde_json::from_str(trimmed) {
    Ok(envelope) => envelope,
    Err(e) => {
      warn!(error = %e, "Dropping malformed frame");
      return;
    }
  };

  let Some(id) = envelope.id.clone() else {
    debug!(kind = %envelope.kind, "Dropping uncorrelated frame");
    return;
  };

  let is_final = match pending.get(&id) {
    Some(request) => request.kind.is_terminal(&envelope.kind),
    None => {
      debug!(%id, kind = %envelope.kind, "Dropping frame for unknown request");
      return;
    }
  };

  trace!(%id, kind = %envelope.kind, is_final, "Routing frame");

  if is_final {
    if let Some((_, request)) = pending.remove(&id) {
      let _ = request.tx.send(Ok(envelope));
    }
    return;
  }

  let delivered = match pending.get(&id) {
    Some(request) => request.tx.send(Ok(envelope)).is_ok(),
    None => return,
  };
  if !delivered {
    pending.remove(&id);
  }
}

//! Stand-in analysis worker speaking the newline-delimited JSON protocol.
//!
//! Produces deterministic transcriptions and frame analyses without any
//! models, and can be told to misbehave (crash, hang, fail) to exercise the
//! supervisor and pipeline.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use editmind::ipc::Envelope;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{
  io::{AsyncRead, AsyncWrite},
  sync::mpsc,
};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{error, info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "stub-worker", about = "Protocol-compatible stand-in for the analysis worker")]
struct Args {
  /// Listen on this unix socket
  #[arg(long, conflicts_with = "port")]
  socket: Option<PathBuf>,

  /// Listen on this loopback TCP port
  #[arg(long)]
  port: Option<u16>,

  /// Wait before listening
  #[arg(long, default_value_t = 0)]
  startup_delay_ms: u64,

  /// Exit with status 1 this long after starting
  #[arg(long)]
  exit_after_ms: Option<u64>,

  /// Exit with status 1 as soon as an analyze request arrives
  #[arg(long)]
  crash_on_analyze: bool,

  /// Never answer analyze requests
  #[arg(long)]
  hang_on_analyze: bool,

  /// Answer analyze requests for videos whose path contains this with an error
  #[arg(long)]
  fail_analyze_matching: Option<String>,

  /// Frames per analysis result
  #[arg(long, default_value_t = 3)]
  frames: usize,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_ansi(false)
    .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .init();

  let args = Args::parse();

  if let Some(ms) = args.exit_after_ms {
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(ms)).await;
      warn!("Exiting on schedule");
      std::process::exit(1);
    });
  }

  if args.startup_delay_ms > 0 {
    tokio::time::sleep(Duration::from_millis(args.startup_delay_ms)).await;
  }

  let result = match (&args.socket, args.port) {
    (Some(path), _) => serve_unix(path.clone(), args.clone()).await,
    (None, Some(port)) => serve_tcp(port, args.clone()).await,
    (None, None) => {
      error!("Either --socket or --port is required");
      std::process::exit(2);
    }
  };

  if let Err(e) = result {
    error!("Worker failed: {e}");
    std::process::exit(1);
  }
}

#[cfg(unix)]
async fn serve_unix(path: PathBuf, args: Args) -> std::io::Result<()> {
  let listener = tokio::net::UnixListener::bind(&path)?;
  info!(path = %path.display(), "Analysis service ready");
  loop {
    let (stream, _) = listener.accept().await?;
    tokio::spawn(handle_connection(stream, args.clone()));
  }
}

#[cfg(not(unix))]
async fn serve_unix(_path: PathBuf, _args: Args) -> std::io::Result<()> {
  Err(std::io::Error::other("unix sockets are not supported on this platform"))
}

async fn serve_tcp(port: u16, args: Args) -> std::io::Result<()> {
  let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
  info!(port, "Analysis service ready");
  loop {
    let (stream, _) = listener.accept().await?;
    tokio::spawn(handle_connection(stream, args.clone()));
  }
}

async fn handle_connection<S>(stream: S, args: Args)
where
  S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
  let (mut sink, mut lines) = Framed::new(stream, LinesCodec::new()).split();
  let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Envelope>();

  let writer = tokio::spawn(async move {
    while let Some(envelope) = out_rx.recv().await {
      let Ok(line) = serde_json::to_string(&envelope) else {
        continue;
      };
      if sink.send(line).await.is_err() {
        break;
      }
    }
  });

  while let Some(Ok(line)) = lines.next().await {
    let request: Envelope = match serde_json::from_str(&line) {
      Ok(request) => request,
      Err(_) => {
        let _ = out_tx.send(Envelope::new("error", json!({ "message": "Invalid JSON" })));
        continue;
      }
    };
    tokio::spawn(handle_request(request, out_tx.clone(), args.clone()));
  }

  drop(out_tx);
  let _ = writer.await;
}

async fn handle_request(request: Envelope, out: mpsc::UnboundedSender<Envelope>, args: Args) {
  let id = request.id.clone();
  let reply = |kind: &str, payload: Value| {
    let mut envelope = Envelope::new(kind, payload);
    envelope.id = id.clone();
    let _ = out.send(envelope);
  };
  let video_path = request
    .payload
    .get("video_path")
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string();

  match request.kind.as_str() {
    "health" => reply("status", json!({ "status": "ready" })),

    "transcribe" => {
      let Some(output) = request.payload.get("json_file_path").and_then(Value::as_str) else {
        reply("transcription_error", json!({ "error": "json_file_path is required" }));
        return;
      };
      reply("transcription_progress", json!({ "progress": 10, "elapsed_time": 0.1 }));
      reply("transcription_message", json!({ "message": "Detected language: English" }));
      reply("transcription_progress", json!({ "progress": 90, "elapsed_time": 0.2 }));

      let transcription = transcription(args.frames);
      match tokio::fs::write(output, transcription.to_string()).await {
        Ok(()) => reply("transcription_complete", json!({ "json_file_path": output })),
        Err(e) => reply("transcription_error", json!({ "error": e.to_string() })),
      }
    }

    "analyze" => {
      if args.crash_on_analyze {
        warn!("Crashing on analyze");
        std::process::exit(1);
      }
      if args.hang_on_analyze {
        reply("analysis_progress", json!({ "plugin": "object_detection", "progress": 5 }));
        return;
      }
      if let Some(pattern) = &args.fail_analyze_matching
        && video_path.contains(pattern.as_str())
      {
        reply("analysis_error", json!({ "message": format!("Failed to open video: {video_path}") }));
        return;
      }

      for (i, plugin) in ["object_detection", "face_recognition", "shot_type"].iter().enumerate() {
        let progress = (i + 1) * 30;
        reply(
          "analysis_progress",
          json!({ "plugin": plugin, "progress": progress, "message": format!("Running {plugin}") }),
        );
      }
      reply("analysis_result", analysis(&video_path, args.frames));
    }

    "reindex_faces" => {
      reply("reindex_progress", json!({ "output": "Loaded 2 known faces" }));
      reply("reindex_progress", json!({ "output": "Re-matched 0 unknown faces" }));
      reply("reindex_complete", json!({ "status": "success" }));
    }

    other => reply("error", json!({ "message": format!("Unknown message type: {other}") })),
  }
}

/// One sentence per two-second frame, one word per half second.
fn transcription(frames: usize) -> Value {
  let segments: Vec<Value> = (0..frames)
    .map(|i| {
      let start = i as f64 * 2.0;
      let words: Vec<Value> = ["scene", "number", "word", "four"]
        .iter()
        .enumerate()
        .map(|(j, w)| {
          let ws = start + j as f64 * 0.5;
          json!({ "word": format!(" {w}"), "start": ws, "end": ws + 0.4, "probability": 0.9 })
        })
        .collect();
      json!({ "start": start, "end": start + 2.0, "text": " scene number word four", "words": words })
    })
    .collect();

  json!({ "text": "scene number word four", "language": "en", "segments": segments })
}

fn analysis(video_path: &str, frames: usize) -> Value {
  let frame_analysis: Vec<Value> = (0..frames)
    .map(|i| {
      let start = i as f64 * 2000.0;
      json!({
        "start_time_ms": start,
        "end_time_ms": start + 2000.0,
        "faces": [{ "name": "Unknown_1", "emotion": "neutral", "location": [10, 60, 50, 20] }],
        "objects": [{ "label": "person", "confidence": 0.91, "box": [0, 0, 100, 200] }],
        "shot_type": "medium-shot",
        "dominant_color": { "name": "gray", "hex": "#808080", "percentage": 42.0, "is_vibrant": false, "is_muted": true },
        "color_palette": []
      })
    })
    .collect();

  json!({
    "video_file": video_path,
    "scene_analysis": { "environment": "indoor", "environment_confidence": 0.6 },
    "detected_activities": [],
    "face_recognition_summary": {},
    "frame_analysis": frame_analysis,
    "summary": { "total_frames_analyzed": frames }
  })
}

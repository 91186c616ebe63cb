//! Index command: discover videos and run them through the pipeline

use anyhow::{Result, bail};
use editmind::{
  config::Config,
  pipeline::{BatchSummary, FfmpegThumbnailer, FileVectorStore, IndexingPipeline, PipelineOptions, VideoOutcome},
  progress::{ProgressBroadcast, ProgressEvent, Step},
  worker::WorkerClient,
};
use serde_json::json;
use std::{path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::discover::discover_videos;

/// Index every video found under `paths`
pub async fn cmd_index(config: Config, paths: &[PathBuf], concurrency: Option<usize>, json: bool) -> Result<()> {
  let videos = discover_videos(paths);
  if videos.is_empty() {
    bail!("No video files found");
  }
  info!(videos = videos.len(), "Discovered videos");

  let mut options = PipelineOptions::from_config(&config.pipeline);
  if let Some(concurrency) = concurrency {
    options.concurrency = concurrency.max(1);
  }

  let supervisor = super::start_worker(&config).await?;
  let client = Arc::new(WorkerClient::from_config(supervisor.clone(), &config.worker));
  let store = Arc::new(FileVectorStore::new(config.pipeline.vector_store_path()));
  let thumbnailer = Arc::new(FfmpegThumbnailer::new(config.pipeline.ffmpeg_path.clone()));
  let (progress, rx) = ProgressBroadcast::new();

  let pipeline = IndexingPipeline::new(client, store, thumbnailer, progress, options);
  let printer = tokio::spawn(print_events(rx, json));

  let summary = tokio::select! {
    summary = pipeline.run(&videos) => Some(summary),
    _ = tokio::signal::ctrl_c() => {
      warn!("Interrupted; completed stages are checkpointed and will be skipped next run");
      None
    }
  };

  // Closing the broadcast ends the printer
  drop(pipeline);
  let _ = printer.await;
  supervisor.stop().await;

  let Some(summary) = summary else {
    std::process::exit(130);
  };
  print_summary(&summary, json);

  if summary.failed() > 0 {
    std::process::exit(1);
  }
  Ok(())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ProgressEvent>, json: bool) {
  while let Some(event) = rx.recv().await {
    if json {
      if let Ok(line) = serde_json::to_string(&event) {
        println!("{line}");
      }
      continue;
    }

    // Intermediate percentages are noise on a terminal
    if event.progress != 0 && event.progress != 100 {
      continue;
    }
    let status = match (event.progress, event.success) {
      (0, _) => "started",
      (_, true) => "done",
      (_, false) => "FAILED",
    };
    println!(
      "[{}/{}] {:<15} {:<8} {}",
      event.step_index + 1,
      Step::ALL.len(),
      event.step.as_str(),
      status,
      event.video
    );
  }
}

fn print_summary(summary: &BatchSummary, json: bool) {
  if json {
    let videos: Vec<_> = summary
      .videos
      .iter()
      .map(|(path, outcome)| json!({ "video": path, "result": outcome }))
      .collect();
    println!(
      "{}",
      json!({
        "summary": {
          "indexed": summary.indexed(),
          "failed": summary.failed(),
          "skipped": summary.skipped(),
          "videos": videos,
        }
      })
    );
    return;
  }

  println!();
  for (path, outcome) in &summary.videos {
    match outcome {
      VideoOutcome::Indexed { scenes } => println!("  indexed  {} ({scenes} scenes)", path.display()),
      VideoOutcome::Failed { step, reason } => println!("  failed   {} at {step}: {reason}", path.display()),
      VideoOutcome::Skipped { reason } => println!("  skipped  {}: {reason}", path.display()),
    }
  }
  println!(
    "\n{} indexed, {} failed, {} skipped",
    summary.indexed(),
    summary.failed(),
    summary.skipped()
  );
}

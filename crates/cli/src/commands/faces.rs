//! Face library commands

use anyhow::{Context, Result};
use editmind::{
  config::Config,
  worker::{AnalysisWorker, WorkerClient},
};
use serde_json::json;
use tokio::sync::mpsc;

/// Re-match stored face encodings, streaming the worker's output
pub async fn cmd_faces_reindex(config: Config, json: bool) -> Result<()> {
  let supervisor = super::start_worker(&config).await?;
  let client = WorkerClient::from_config(supervisor.clone(), &config.worker);

  let (tx, mut rx) = mpsc::channel::<String>(64);
  let printer = tokio::spawn(async move {
    while let Some(line) = rx.recv().await {
      if json {
        println!("{}", json!({ "output": line }));
      } else {
        println!("{line}");
      }
    }
  });

  let result = client.reindex_faces(Some(tx)).await;
  let _ = printer.await;
  supervisor.stop().await;

  let result = result.context("Face reindexing failed")?;
  if json {
    println!("{}", json!({ "result": result }));
  } else {
    let status = result.get("status").and_then(|s| s.as_str()).unwrap_or("done");
    println!("Face reindexing: {status}");
  }
  Ok(())
}

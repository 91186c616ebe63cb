//! Worker diagnostics

use anyhow::{Context, Result};
use editmind::config::Config;
use serde_json::json;

/// Start the worker, round-trip a health request and stop it again
pub async fn cmd_worker_check(config: Config, json: bool) -> Result<()> {
  let supervisor = super::start_worker(&config).await?;
  let health = supervisor.health().await;
  let endpoint = supervisor.endpoint().map(|e| e.to_string());
  let pid = supervisor.pid();
  let state = supervisor.state();
  supervisor.stop().await;

  let status = health.context("Health check failed")?;

  if json {
    println!(
      "{}",
      json!({ "status": status, "state": state, "endpoint": endpoint, "pid": pid })
    );
  } else {
    println!("Worker:     {}", config.worker.program);
    println!("State:      {state}");
    println!("Endpoint:   {}", endpoint.as_deref().unwrap_or("-"));
    println!("PID:        {}", pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()));
    println!("Health:     {status}");
  }
  Ok(())
}

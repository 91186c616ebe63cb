//! CLI command implementations

mod config;
mod faces;
mod index;
mod worker;

use anyhow::{Context, Result};
use editmind::{config::Config, worker::Supervisor};
use std::path::Path;

pub use config::{cmd_config_init, cmd_config_show};
pub use faces::cmd_faces_reindex;
pub use index::cmd_index;
pub use worker::cmd_worker_check;

/// Effective config: `--config` file if given, else the user config
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
  Config::resolve(explicit).context("Failed to load config")
}

/// Spawn the analysis worker and wait until it accepts requests
async fn start_worker(config: &Config) -> Result<Supervisor> {
  let supervisor = Supervisor::new(config.worker.clone());
  supervisor
    .start()
    .await
    .with_context(|| format!("Failed to start analysis worker `{}`", config.worker.program))?;
  Ok(supervisor)
}

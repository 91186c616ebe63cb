//! editmind CLI - index a video library through the analysis worker

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod discover;
mod logging;

use commands::{cmd_config_init, cmd_config_show, cmd_faces_reindex, cmd_index, cmd_worker_check, load_config};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "editmind")]
#[command(about = "Index a video library for scene search")]
#[command(after_help = "\
QUICK START:
  editmind config init            # Write a default config
  editmind worker check           # Make sure the analysis worker starts
  editmind index ~/Videos         # Index every video under a folder

Interrupted runs resume from per-video checkpoints.")]
struct Cli {
  /// Config file (default: ~/.config/editmind/config.toml)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Print progress events and results as JSON lines
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `editmind faces`
#[derive(Subcommand)]
pub enum FacesCommand {
  /// Re-match stored faces against the known-faces library
  Reindex,
}

/// Subcommands for `editmind worker`
#[derive(Subcommand)]
pub enum WorkerCommand {
  /// Start the worker, run a health check and stop it
  Check,
}

/// Subcommands for `editmind config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show current effective configuration
  Show,

  /// Write a default user config file
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Index videos (files or folders, walked recursively)
  #[command(after_help = "\
EXAMPLES:
  editmind index clip.mp4
  editmind index ~/Videos --concurrency 2
  editmind index ~/Videos --json > progress.jsonl")]
  Index {
    /// Video files or folders
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// Videos processed at once (overrides pipeline.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,
  },
  /// Face library maintenance
  Faces {
    #[command(subcommand)]
    command: FacesCommand,
  },
  /// Analysis worker diagnostics
  Worker {
    #[command(subcommand)]
    command: WorkerCommand,
  },
  /// Manage configuration
  #[command(after_help = "\
CONFIG LOCATIONS:
  Explicit: --config <file>
  User:     ~/.config/editmind/config.toml")]
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  // Config commands must work even when the config file is broken
  if let Commands::Config { command } = &cli.command {
    logging::init_cli_logging();
    return match command {
      ConfigCommand::Show => cmd_config_show(cli.config.as_deref()),
      ConfigCommand::Init { force } => cmd_config_init(*force),
    };
  }

  let config = load_config(cli.config.as_deref())?;
  let _guard = init_logging(&config.logging);

  match cli.command {
    Commands::Index { paths, concurrency } => cmd_index(config, &paths, concurrency, cli.json).await,
    Commands::Faces { command } => match command {
      FacesCommand::Reindex => cmd_faces_reindex(config, cli.json).await,
    },
    Commands::Worker { command } => match command {
      WorkerCommand::Check => cmd_worker_check(config, cli.json).await,
    },
    Commands::Config { .. } => Ok(()),
  }
}

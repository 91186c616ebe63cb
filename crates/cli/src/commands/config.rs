//! Configuration commands

use anyhow::{Context, Result, bail};
use editmind::config::Config;
use std::path::Path;

/// Show the effective configuration as TOML
pub fn cmd_config_show(explicit: Option<&Path>) -> Result<()> {
  let (source, config) = match explicit {
    Some(path) => (path.display().to_string(), super::load_config(Some(path))?),
    None => {
      let path = Config::user_config_path();
      let source = if path.exists() {
        path.display().to_string()
      } else {
        "(defaults)".to_string()
      };
      (source, Config::load_global())
    }
  };

  let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
  println!("# Source: {source}\n");
  print!("{rendered}");
  Ok(())
}

/// Write the commented default config to the user config path
pub fn cmd_config_init(force: bool) -> Result<()> {
  let path = Config::user_config_path();
  if path.exists() && !force {
    bail!("{} already exists (use --force to overwrite)", path.display());
  }

  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }
  std::fs::write(&path, Config::generate_template()).with_context(|| format!("Failed to write {}", path.display()))?;

  println!("Wrote {}", path.display());
  Ok(())
}

//! Config commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use corpusd::config::Config;

/// Show the effective configuration and where it came from
pub fn cmd_config_show(config: &Config, explicit: Option<&Path>) -> Result<()> {
  match Config::source_path(explicit) {
    Some(path) => println!("# Config file: {}", path.display()),
    None => println!("# No config file found, using defaults"),
  }
  println!();

  let toml = toml::to_string_pretty(config).context("Failed to serialize config")?;
  print!("{toml}");
  Ok(())
}

/// Write the commented template to `explicit` or the user config path
pub fn cmd_config_init(explicit: Option<&Path>, force: bool) -> Result<()> {
  let path = init_target(explicit)?;
  write_template(&path, force)?;
  println!("Created config file: {}", path.display());
  println!();
  println!("Edit this file to point at your Meilisearch instance and tune the resource monitor.");
  Ok(())
}

fn init_target(explicit: Option<&Path>) -> Result<PathBuf> {
  match explicit {
    Some(path) => Ok(path.to_path_buf()),
    None => Config::user_config_path().context("Could not determine the user config directory"),
  }
}

fn write_template(path: &Path, force: bool) -> Result<()> {
  if path.exists() && !force {
    bail!("Config file already exists: {} (use --force to overwrite)", path.display());
  }

  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }

  std::fs::write(path, Config::generate_template())
    .with_context(|| format!("Failed to write config file {}", path.display()))
}

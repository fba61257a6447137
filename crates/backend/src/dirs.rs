//! Where corpusd keeps things on disk.
//!
//! | Root   | Holds                                          | Lifetime              |
//! |--------|------------------------------------------------|-----------------------|
//! | data   | adopted thumbnails, served to search clients   | permanent             |
//! | config | `config.toml`                                  | user-managed          |
//! | cache  | per-job extractor staging and zip scratch files | removed at job end    |
//!
//! `[ingest] thumbnail_dir` and `staging_dir` override the data and cache
//! defaults per install.

use std::path::PathBuf;

const APP_DIR: &str = "corpusd";

/// `$override` verbatim, else `$xdg/corpusd`, else `<platform>/corpusd`,
/// else `./corpusd`.
fn resolve(override_var: Option<&str>, xdg_var: &str, platform: Option<PathBuf>) -> PathBuf {
  if let Some(dir) = override_var.and_then(|var| std::env::var_os(var)) {
    return PathBuf::from(dir);
  }
  if let Some(xdg) = std::env::var_os(xdg_var) {
    return PathBuf::from(xdg).join(APP_DIR);
  }
  platform.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// Root for adopted thumbnails. `DATA_DIR` points it at an existing volume,
/// e.g. the directory a web server exposes under the thumbnail URL prefix.
pub fn default_data_dir() -> PathBuf {
  resolve(Some("DATA_DIR"), "XDG_DATA_HOME", dirs::data_local_dir())
}

/// Directory holding the user `config.toml`. `CONFIG_DIR` overrides it.
pub fn default_config_dir() -> PathBuf {
  resolve(Some("CONFIG_DIR"), "XDG_CONFIG_HOME", dirs::config_dir())
}

/// Scratch root for extractor output. Nothing here outlives a job, so it is
/// safe to place on fast, non-persistent storage.
pub fn default_cache_dir() -> PathBuf {
  resolve(None, "XDG_CACHE_HOME", dirs::cache_dir())
}

//! Configuration for corpusd.
//!
//! Config priority: explicit path > ./corpusd.toml > user (~/.config/corpusd/config.toml) > defaults

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::dirs;

/// File name looked up in the working directory before the user config
pub const LOCAL_CONFIG_FILE: &str = "corpusd.toml";

/// Extensions ingested by the folder and zip producers
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
  "pdf", "txt", "docx", "doc", "md", "xlsx", "html", "htm", "jpg", "jpeg", "png", "gif", "webp", "svg", "bmp",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Search engine (Meilisearch) connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Base URL of the Meilisearch server
  pub url: String,

  /// API key; falls back to MEILI_MASTER_KEY when unset
  pub api_key: Option<String>,

  /// Index uid documents are written to
  pub index: String,

  /// How long a primary batch commit may take before it counts as failed
  pub commit_timeout_secs: u64,

  /// How long an image-metadata patch may take
  pub maintenance_timeout_secs: u64,

  /// Task status poll interval
  pub task_poll_ms: u64,

  /// Per-request HTTP timeout
  pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      url: "http://127.0.0.1:7700".to_string(),
      api_key: None,
      index: "documents".to_string(),
      commit_timeout_secs: 60,
      maintenance_timeout_secs: 30,
      task_poll_ms: 50,
      request_timeout_secs: 30,
    }
  }
}

impl EngineConfig {
  pub fn resolved_api_key(&self) -> Option<String> {
    self
      .api_key
      .clone()
      .filter(|k| !k.is_empty())
      .or_else(|| std::env::var("MEILI_MASTER_KEY").ok().filter(|k| !k.is_empty()))
  }

  pub fn commit_timeout(&self) -> Duration {
    Duration::from_secs(self.commit_timeout_secs)
  }

  pub fn maintenance_timeout(&self) -> Duration {
    Duration::from_secs(self.maintenance_timeout_secs)
  }
}

// ============================================================================
// Monitor Configuration
// ============================================================================

/// Thresholds and step sizes for the resource ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  pub batch_min: usize,
  pub batch_default: usize,
  pub batch_max: usize,
  /// Growth per sample in the low-pressure band
  pub batch_step_up: usize,
  /// Shrink per sample in the moderate band
  pub batch_step_down: usize,

  /// Memory usage fractions (1 - available/total)
  pub memory_critical: f64,
  pub memory_high: f64,
  pub memory_moderate: f64,
  pub memory_low: f64,

  /// One-minute load average divided by core count
  pub load_high: f64,
  pub load_elevated: f64,

  pub critical_sleep_ms: u64,
  pub high_sleep_ms: u64,
  pub moderate_sleep_ms: u64,
  pub load_high_sleep_ms: u64,
  pub load_elevated_sleep_ms: u64,

  /// Re-sample telemetry every N records
  pub sample_interval: u64,

  pub cooldown_poll_ms: u64,
  /// Single wait before the end-of-stream drain
  pub cooldown_max_wait_ms: u64,
  /// Wait between drain sub-batches while memory stays above the high mark
  pub cooldown_recheck_wait_ms: u64,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      batch_min: 10,
      batch_default: 50,
      batch_max: 400,
      batch_step_up: 10,
      batch_step_down: 5,
      memory_critical: 0.90,
      memory_high: 0.80,
      memory_moderate: 0.65,
      memory_low: 0.50,
      load_high: 2.0,
      load_elevated: 1.5,
      critical_sleep_ms: 2000,
      high_sleep_ms: 200,
      moderate_sleep_ms: 50,
      load_high_sleep_ms: 300,
      load_elevated_sleep_ms: 100,
      sample_interval: 50,
      cooldown_poll_ms: 1000,
      cooldown_max_wait_ms: 60_000,
      cooldown_recheck_wait_ms: 30_000,
    }
  }
}

impl MonitorConfig {
  pub fn cooldown_max_wait(&self) -> Duration {
    Duration::from_millis(self.cooldown_max_wait_ms)
  }

  pub fn cooldown_recheck_wait(&self) -> Duration {
    Duration::from_millis(self.cooldown_recheck_wait_ms)
  }

  pub fn cooldown_poll(&self) -> Duration {
    Duration::from_millis(self.cooldown_poll_ms)
  }
}

// ============================================================================
// Deferred Image Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredConfig {
  /// Tasks adopted per opportunistic drain
  pub drain_chunk: usize,
  /// Patches per partial update during the final drain
  pub patch_batch: usize,
}

impl Default for DeferredConfig {
  fn default() -> Self {
    Self {
      drain_chunk: 100,
      patch_batch: 50,
    }
  }
}

// ============================================================================
// Extractor Configuration
// ============================================================================

/// The external `doc_extractor` executable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
  /// Program to run (resolved through PATH)
  pub command: String,

  /// Arguments placed before the mode flags, e.g. a script path when the
  /// command is an interpreter
  pub args: Vec<String>,

  /// Grace period for the streaming extractor to exit once its output closes
  pub exit_timeout_secs: u64,

  /// Bound on a single-file extraction
  pub single_file_timeout_secs: u64,
}

impl Default for ExtractorConfig {
  fn default() -> Self {
    Self {
      command: "doc_extractor".to_string(),
      args: Vec::new(),
      exit_timeout_secs: 30,
      single_file_timeout_secs: 120,
    }
  }
}

// ============================================================================
// Ingest Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
  /// Lowercase extensions without the leading dot
  pub allowed_extensions: Vec<String>,

  /// Content is truncated to this many characters
  pub max_content_chars: usize,

  /// Records with less trimmed text than this count as failed
  pub min_text_chars: usize,

  /// Most recent errors kept per job
  pub error_log_capacity: usize,

  /// Emit a progress log line every N records
  pub progress_log_interval: u64,

  /// Where adopted thumbnails are stored (default: <data_dir>/thumbnails)
  pub thumbnail_dir: Option<PathBuf>,

  /// URL prefix for thumbnail references written to the index
  pub thumbnail_url_prefix: String,

  /// Root for per-job staging directories (default: <cache_dir>/staging)
  pub staging_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self {
      allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
      max_content_chars: 100_000,
      min_text_chars: 10,
      error_log_capacity: 50,
      progress_log_interval: 1000,
      thumbnail_dir: None,
      thumbnail_url_prefix: "/static/thumbnails".to_string(),
      staging_dir: None,
    }
  }
}

impl IngestConfig {
  pub fn thumbnail_dir(&self) -> PathBuf {
    self
      .thumbnail_dir
      .clone()
      .unwrap_or_else(|| dirs::default_data_dir().join("thumbnails"))
  }

  pub fn staging_dir(&self) -> PathBuf {
    self
      .staging_dir
      .clone()
      .unwrap_or_else(|| dirs::default_cache_dir().join("staging"))
  }
}

// ============================================================================
// Daemon Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  pub log_level: String,

  /// Log file rotation: "daily", "hourly", "never"
  pub log_rotation: String,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      log_level: "info".to_string(),
      log_rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub engine: EngineConfig,
  pub monitor: MonitorConfig,
  pub deferred: DeferredConfig,
  pub extractor: ExtractorConfig,
  pub ingest: IngestConfig,
  pub daemon: DaemonConfig,
}

impl Config {
  /// Load config, preferring an explicit path, then `./corpusd.toml`, then the
  /// user config. Missing files fall through; unreadable or invalid ones do not.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    match Self::source_path(explicit) {
      Some(path) => Self::from_file(&path),
      None => {
        let config = Self::default();
        config.validate()?;
        Ok(config)
      }
    }
  }

  /// The file [`load`](Self::load) would read, or `None` for defaults
  pub fn source_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
      return Some(path.to_path_buf());
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
      return Some(local);
    }

    Self::user_config_path().filter(|path| path.exists())
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate()?;
    Ok(config)
  }

  /// Get the user-level config path
  pub fn user_config_path() -> Option<PathBuf> {
    Some(dirs::default_config_dir().join("config.toml"))
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let m = &self.monitor;
    if m.batch_min == 0 || m.batch_min > m.batch_default || m.batch_default > m.batch_max {
      return Err(ConfigError::Invalid(format!(
        "batch sizes must satisfy 1 <= min <= default <= max (got {}/{}/{})",
        m.batch_min, m.batch_default, m.batch_max
      )));
    }

    let ordered = 0.0 < m.memory_low
      && m.memory_low < m.memory_moderate
      && m.memory_moderate < m.memory_high
      && m.memory_high < m.memory_critical
      && m.memory_critical <= 1.0;
    if !ordered {
      return Err(ConfigError::Invalid(
        "memory thresholds must satisfy 0 < low < moderate < high < critical <= 1".to_string(),
      ));
    }

    if m.load_elevated > m.load_high {
      return Err(ConfigError::Invalid("load_elevated must not exceed load_high".to_string()));
    }

    if m.sample_interval == 0 || m.cooldown_poll_ms == 0 {
      return Err(ConfigError::Invalid(
        "sample_interval and cooldown_poll_ms must be positive".to_string(),
      ));
    }

    if self.deferred.drain_chunk == 0 || self.deferred.patch_batch == 0 {
      return Err(ConfigError::Invalid("deferred chunk sizes must be positive".to_string()));
    }

    if self.extractor.command.trim().is_empty() {
      return Err(ConfigError::Invalid("extractor.command is empty".to_string()));
    }

    Ok(())
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let extensions = DEFAULT_ALLOWED_EXTENSIONS
      .iter()
      .map(|e| format!("\"{e}\""))
      .collect::<Vec<_>>()
      .join(", ");

    format!(
      r#"# corpusd configuration
# Place in ./corpusd.toml or ~/.config/corpusd/config.toml

# ============================================================================
# Search Engine
# ============================================================================

[engine]
url = "http://127.0.0.1:7700"
# api_key = "..."            # falls back to MEILI_MASTER_KEY
index = "documents"
commit_timeout_secs = 60      # primary batch commit
maintenance_timeout_secs = 30 # thumbnail patches
task_poll_ms = 50
request_timeout_secs = 30

# ============================================================================
# Resource Monitor
# ============================================================================

[monitor]
batch_min = 10
batch_default = 50
batch_max = 400
batch_step_up = 10
batch_step_down = 5

# memory usage fractions; 0.50..0.65 is a dead zone with no adjustment
memory_critical = 0.90
memory_high = 0.80
memory_moderate = 0.65
memory_low = 0.50

# load1 / cores
load_high = 2.0
load_elevated = 1.5

critical_sleep_ms = 2000
high_sleep_ms = 200
moderate_sleep_ms = 50
load_high_sleep_ms = 300
load_elevated_sleep_ms = 100

sample_interval = 50          # records between samples
cooldown_poll_ms = 1000
cooldown_max_wait_ms = 60000
cooldown_recheck_wait_ms = 30000

# ============================================================================
# Deferred Images
# ============================================================================

[deferred]
drain_chunk = 100
patch_batch = 50

# ============================================================================
# Extractor
# ============================================================================

[extractor]
command = "doc_extractor"
args = []
exit_timeout_secs = 30
single_file_timeout_secs = 120

# ============================================================================
# Ingest
# ============================================================================

[ingest]
allowed_extensions = [{extensions}]
max_content_chars = 100000
min_text_chars = 10
error_log_capacity = 50
progress_log_interval = 1000
# thumbnail_dir = "/var/lib/corpusd/thumbnails"
thumbnail_url_prefix = "/static/thumbnails"
# staging_dir = "/var/cache/corpusd/staging"

# ============================================================================
# Logging
# ============================================================================

[daemon]
log_level = "info"            # off, error, warn, info, debug, trace
log_rotation = "daily"        # daily, hourly, never
"#
    )
  }
}

//! Logging setup for CLI commands

use std::path::Path;

use corpusd::config::DaemonConfig;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Parse log level from config string
fn parse_log_level(level: &str) -> LevelFilter {
  match level.to_lowercase().as_str() {
    "off" => LevelFilter::OFF,
    "error" => LevelFilter::ERROR,
    "warn" => LevelFilter::WARN,
    "info" => LevelFilter::INFO,
    "debug" => LevelFilter::DEBUG,
    "trace" => LevelFilter::TRACE,
    _ => LevelFilter::INFO,
  }
}

/// `-v` raises the configured level to debug, `-vv` to trace
fn effective_level(config: &DaemonConfig, verbose: u8) -> LevelFilter {
  match verbose {
    0 => parse_log_level(&config.log_level),
    1 => LevelFilter::DEBUG,
    _ => LevelFilter::TRACE,
  }
}

/// Initialize logging from the `[daemon]` section.
///
/// Without `log_file` logs go to stderr with colors, keeping stdout free for
/// command output. With it they go to a rolling file (no ANSI) and the
/// returned guard must be kept alive until exit.
pub fn init_logging(config: &DaemonConfig, verbose: u8, log_file: Option<&Path>) -> Option<WorkerGuard> {
  // RUST_LOG still wins over the configured level
  let env_filter = EnvFilter::builder()
    .with_default_directive(effective_level(config, verbose).into())
    .from_env_lossy();

  let Some(log_file) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_writer(std::io::stderr)
      .init();
    return None;
  };

  let log_dir = log_file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
  let file_name = log_file
    .file_name()
    .map(|n| n.to_os_string())
    .unwrap_or_else(|| "corpusd.log".into());

  if std::fs::create_dir_all(log_dir).is_err() {
    // Fall back to console-only logging
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_writer(std::io::stderr)
      .init();
    return None;
  }

  let file_appender = match config.log_rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(log_dir, file_name),
    "never" => tracing_appender::rolling::never(log_dir, file_name),
    _ => tracing_appender::rolling::daily(log_dir, file_name),
  };

  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

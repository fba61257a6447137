//! Composition root.
//!
//! Everything process-scoped is built here from a [`Config`] and handed down
//! explicitly; no component reaches for a global.
//!
//! # Architecture
//!
//! ```text
//! App
//!   └── JobRegistry (root CancellationToken, TaskTracker)
//!         └── PipelineContext (shared, read-only)
//!               ├── SearchEngine (Meilisearch)
//!               ├── ThumbnailStore
//!               └── ProbeFactory (one ResourceProbe per worker)
//! ```

use std::sync::Arc;

use tracing::info;

use crate::{
  domain::config::{Config, ConfigError},
  engine::{EngineError, SearchEngine},
  jobs::JobRegistry,
  monitor::{ProbeFactory, sysinfo_probe_factory},
  pipeline::PipelineContext,
};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
  #[error("Invalid configuration: {0}")]
  Config(#[from] ConfigError),
  #[error("Search engine unavailable: {0}")]
  Engine(#[from] EngineError),
  #[error("Cannot prepare {path}: {source}")]
  Directory {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

pub struct App {
  config: Arc<Config>,
  registry: Arc<JobRegistry>,
}

impl App {
  /// Build against the configured Meilisearch and the host's real telemetry.
  pub fn new(config: Config) -> Result<Self, AppError> {
    config.validate()?;
    let engine = <dyn SearchEngine>::from_config(&config.engine)?;
    Self::with_parts(config, engine, sysinfo_probe_factory())
  }

  /// Build with an explicit engine and probe source.
  pub fn with_parts(config: Config, engine: Arc<dyn SearchEngine>, probes: ProbeFactory) -> Result<Self, AppError> {
    let config = Arc::new(config);
    let ctx = PipelineContext::new(config.clone(), engine, probes);

    for dir in [ctx.thumbnails.root(), ctx.staging_root.as_path()] {
      std::fs::create_dir_all(dir).map_err(|source| AppError::Directory {
        path: dir.display().to_string(),
        source,
      })?;
    }

    info!(
      engine = ctx.engine.name(),
      thumbnails = %ctx.thumbnails.root().display(),
      staging = %ctx.staging_root.display(),
      "Ingestion service ready"
    );

    Ok(Self {
      registry: Arc::new(JobRegistry::new(Arc::new(ctx))),
      config,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn registry(&self) -> Arc<JobRegistry> {
    self.registry.clone()
  }

  /// Interrupt running jobs and wait for their workers.
  pub async fn shutdown(&self) {
    self.registry.shutdown().await;
  }
}

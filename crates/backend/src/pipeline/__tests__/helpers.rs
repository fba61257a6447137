//! Test helpers for pipeline integration tests.
//!
//! Provides `PipelineTestContext`, which owns the input and data directories,
//! an in-memory engine, and a scripted resource probe, and runs jobs to
//! completion through the real worker.

use std::{
  fs,
  path::{Path, PathBuf},
  sync::Arc,
};

use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::{
  domain::{
    config::Config,
    job::{Job, JobId, JobKind, JobSnapshot},
  },
  engine::{MemoryEngine, SearchEngine},
  monitor::ScriptedProbe,
  pipeline::{PipelineContext, run_job},
};

pub struct PipelineTestContext {
  /// Inputs: folders, archives, extractor scripts
  pub input_dir: TempDir,
  /// Thumbnails, staging, pre-rendered thumbnail fixtures
  pub data_dir: TempDir,
  pub engine: Arc<MemoryEngine>,
  /// Starts at 30% memory, 0.1 load ratio
  pub probe: ScriptedProbe,
  pub config: Config,
}

impl PipelineTestContext {
  pub fn new() -> Self {
    let input_dir = TempDir::new().expect("create input temp dir");
    let data_dir = TempDir::new().expect("create data temp dir");

    // Small batches, near-zero sleeps, and sub-second cooldowns
    let mut config = Config::default();
    config.monitor.batch_min = 2;
    config.monitor.batch_default = 3;
    config.monitor.batch_max = 8;
    config.monitor.batch_step_up = 1;
    config.monitor.batch_step_down = 1;
    config.monitor.critical_sleep_ms = 5;
    config.monitor.high_sleep_ms = 1;
    config.monitor.moderate_sleep_ms = 0;
    config.monitor.load_high_sleep_ms = 1;
    config.monitor.load_elevated_sleep_ms = 1;
    config.monitor.sample_interval = 1;
    config.monitor.cooldown_poll_ms = 10;
    config.monitor.cooldown_max_wait_ms = 100;
    config.monitor.cooldown_recheck_wait_ms = 20;
    config.deferred.patch_batch = 4;
    config.engine.commit_timeout_secs = 1;
    config.engine.maintenance_timeout_secs = 1;
    config.extractor.exit_timeout_secs = 2;
    config.extractor.single_file_timeout_secs = 5;
    config.ingest.error_log_capacity = 100;
    config.ingest.thumbnail_dir = Some(data_dir.path().join("thumbnails"));
    config.ingest.staging_dir = Some(data_dir.path().join("staging"));

    Self {
      input_dir,
      data_dir,
      engine: Arc::new(MemoryEngine::new()),
      probe: ScriptedProbe::new(0.3, 0.1),
      config,
    }
  }

  pub fn context(&self) -> Arc<PipelineContext> {
    let engine: Arc<dyn SearchEngine> = self.engine.clone();
    Arc::new(PipelineContext::new(
      Arc::new(self.config.clone()),
      engine,
      self.probe.factory(),
    ))
  }

  /// Write a file below the input directory, creating parents.
  pub fn write_input(&self, relative: &str, content: &[u8]) -> PathBuf {
    let path = self.input_dir.path().join(relative);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(&path, content).expect("write input file");
    path
  }

  /// A placeholder `.zim` archive; the fake extractor never reads it.
  pub fn zim_archive(&self, name: &str) -> PathBuf {
    self.write_input(name, b"ZIM")
  }

  /// Install a streaming extractor that prints `lines` and exits with `exit_code`.
  pub fn streaming_extractor(&mut self, lines: &[String], exit_code: i32) {
    let records = self.write_input("records.jsonl", lines.join("\n").as_bytes());
    self.extractor_script(&format!("cat '{}'\nexit {exit_code}\n", records.display()));
  }

  /// Install an arbitrary `sh` script as the streaming extractor.
  pub fn extractor_script(&mut self, body: &str) {
    let script = self.write_input("extractor.sh", body.as_bytes());
    self.config.extractor.command = "sh".to_string();
    self.config.extractor.args = vec![script.to_string_lossy().into_owned()];
  }

  /// Pre-rendered thumbnails as the extractor would leave them.
  pub fn rendered_thumbnails(&self, name: &str) -> PathBuf {
    let dir = self.data_dir.path().join("rendered").join(name);
    fs::create_dir_all(&dir).expect("create rendered dir");
    for size in ["large", "small"] {
      fs::write(dir.join(format!("{name}_thumb_0_{size}.jpg")), b"jpeg").expect("write thumbnail");
    }
    dir
  }

  pub fn thumbnail_root(&self) -> PathBuf {
    self.data_dir.path().join("thumbnails")
  }

  pub fn staging_root(&self) -> PathBuf {
    self.data_dir.path().join("staging")
  }

  pub async fn run(&self, kind: JobKind, target: &Path) -> JobSnapshot {
    self.run_with(kind, target, CancellationToken::new()).await
  }

  pub async fn run_with(&self, kind: JobKind, target: &Path, cancel: CancellationToken) -> JobSnapshot {
    let job = Arc::new(Job::new(
      JobId::generate(),
      kind,
      target.to_path_buf(),
      self.config.ingest.error_log_capacity,
    ));
    run_job(self.context(), job.clone(), cancel).await;
    job.snapshot()
  }
}

/// One streaming extractor output line
pub fn record_line(path: &str, text: &str, thumb_dir: Option<&Path>) -> String {
  json!({
    "path": path,
    "title": path.rsplit('/').next().unwrap_or(path).replace('_', " "),
    "text": text,
    "size": text.len(),
    "thumb_dir": thumb_dir.map(|d| d.to_string_lossy().into_owned()).unwrap_or_default(),
  })
  .to_string()
}

/// Terminal accounting every finished job must satisfy
pub fn assert_accounted(snap: &JobSnapshot) {
  assert!(snap.status.is_terminal(), "job still running: {snap:?}");
  assert_eq!(snap.processed, snap.indexed + snap.failed, "processed != indexed + failed: {snap:?}");
  assert_eq!(snap.deferred, 0, "deferred queue not empty: {snap:?}");
}

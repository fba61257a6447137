//! JobRegistry - submits ingestion jobs and answers progress polls.
//!
//! # Design Principles
//!
//! - **Idempotent submission**: a target with a running job is not started
//!   twice; the running job's id is returned instead
//! - **Never blocks on ingestion**: `submit` spawns the worker and returns
//! - **Lock-free reads**: job records live in a `DashMap`; pollers read
//!   counters without coordinating with the worker
//! - **No eviction**: finished jobs stay queryable for the process lifetime
//!
//! # Usage
//!
//! ```ignore
//! let registry = JobRegistry::new(ctx);
//! let id = registry.submit(JobKind::FolderSync, Path::new("/srv/docs")).id().clone();
//! let snapshot = registry.get(&id);
//! ```

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use dashmap::DashMap;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

use crate::{
  domain::job::{Job, JobId, JobKind, JobSnapshot},
  pipeline::{PipelineContext, run_job},
};

/// Result of [`JobRegistry::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
  /// A new job was created and its worker started
  Started(JobId),
  /// A job for the same target is still running
  AlreadyRunning(JobId),
}

impl Submission {
  pub fn id(&self) -> &JobId {
    match self {
      Submission::Started(id) | Submission::AlreadyRunning(id) => id,
    }
  }

  pub fn is_duplicate(&self) -> bool {
    matches!(self, Submission::AlreadyRunning(_))
  }
}

// ============================================================================
// JobRegistry
// ============================================================================

/// Owns every job record and the workers that drive them.
///
/// # Thread Safety
///
/// Safe to share via `Arc<JobRegistry>`. The active-target map is the only
/// lock, held around the duplicate check, the insert, and the worker's
/// final removal.
pub struct JobRegistry {
  /// Every job ever submitted
  jobs: DashMap<JobId, Arc<Job>>,

  /// Target -> job currently (or most recently) running against it
  active: Arc<Mutex<HashMap<PathBuf, JobId>>>,

  /// Shared worker dependencies
  ctx: Arc<PipelineContext>,

  /// Parent of every worker's token; cancelled only by `shutdown`
  cancel: CancellationToken,

  /// Workers still running
  tracker: TaskTracker,
}

impl JobRegistry {
  pub fn new(ctx: Arc<PipelineContext>) -> Self {
    Self {
      jobs: DashMap::new(),
      active: Arc::new(Mutex::new(HashMap::new())),
      ctx,
      cancel: CancellationToken::new(),
      tracker: TaskTracker::new(),
    }
  }

  /// Start a job for `target` unless one is already running for it.
  ///
  /// Never fails: an unusable target produces a job that ends `failed`.
  /// Must be called inside a tokio runtime.
  pub fn submit(&self, kind: JobKind, target: &Path) -> Submission {
    let target = normalize_target(target);
    let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(existing) = active.get(&target)
      && self.jobs.get(existing).is_some_and(|job| job.is_running())
    {
      debug!(job_id = %existing, target = %target.display(), "Job already running for target");
      return Submission::AlreadyRunning(existing.clone());
    }

    let job = Arc::new(Job::new(
      JobId::generate(),
      kind,
      target.clone(),
      self.ctx.config.ingest.error_log_capacity,
    ));
    let id = job.id().clone();
    self.jobs.insert(id.clone(), job.clone());
    active.insert(target.clone(), id.clone());
    drop(active);

    info!(job_id = %id, %kind, target = %target.display(), "Job submitted");

    let ctx = self.ctx.clone();
    let cancel = self.cancel.child_token();
    let registered = self.active.clone();
    let worker_id = id.clone();
    self.tracker.spawn(async move {
      run_job(ctx, job, cancel).await;

      let mut active = registered.lock().unwrap_or_else(PoisonError::into_inner);
      if active.get(&target) == Some(&worker_id) {
        active.remove(&target);
      }
    });

    Submission::Started(id)
  }

  pub fn get(&self, id: &JobId) -> Option<JobSnapshot> {
    self.jobs.get(id).map(|job| job.snapshot())
  }

  /// Every known job, oldest first
  pub fn list(&self) -> Vec<JobSnapshot> {
    let mut snapshots: Vec<JobSnapshot> = self.jobs.iter().map(|entry| entry.value().snapshot()).collect();
    snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
    snapshots
  }

  pub fn running(&self) -> usize {
    self.jobs.iter().filter(|entry| entry.value().is_running()).count()
  }

  /// Poll until the job is terminal. `None` for an unknown id.
  pub async fn wait_until_finished(&self, id: &JobId, poll: Duration) -> Option<JobSnapshot> {
    loop {
      let snapshot = self.get(id)?;
      if snapshot.status.is_terminal() {
        return Some(snapshot);
      }
      tokio::time::sleep(poll).await;
    }
  }

  /// Interrupt every running job and wait for the workers to finish.
  pub async fn shutdown(&self) {
    let running = self.running();
    info!(running, "Shutting down job registry");
    self.cancel.cancel();
    self.tracker.close();
    self.tracker.wait().await;
    debug!("All job workers stopped");
  }
}

/// Absolute, symlink-resolved form of `target` when it exists
fn normalize_target(target: &Path) -> PathBuf {
  std::fs::canonicalize(target)
    .or_else(|_| std::path::absolute(target))
    .unwrap_or_else(|_| target.to_path_buf())
}

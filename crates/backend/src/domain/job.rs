//! Job records.
//!
//! A [`Job`] has exactly one writer (its worker) and any number of readers
//! (pollers). Counters are independent atomics, so a snapshot taken while the
//! job runs may mix values from slightly different moments. The status is
//! stored last with release ordering once the worker is done; a snapshot that
//! observes a terminal status therefore observes the final counters.

use std::{
  collections::VecDeque,
  fmt,
  path::{Path, PathBuf},
  sync::{
    Mutex, PoisonError,
    atomic::{AtomicU8, AtomicU64, Ordering},
  },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{domain::document::ImageSkip, monitor::MonitorSummary};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
  pub fn generate() -> Self {
    Self(Uuid::new_v4().to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for JobId {
  fn from(value: &str) -> Self {
    Self(value.to_string())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
  FolderSync,
  ArchiveIndex,
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      JobKind::FolderSync => f.write_str("folder-sync"),
      JobKind::ArchiveIndex => f.write_str("archive-index"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Running,
  Completed,
  Failed,
}

impl JobStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, JobStatus::Running)
  }

  fn as_u8(self) -> u8 {
    match self {
      JobStatus::Running => 0,
      JobStatus::Completed => 1,
      JobStatus::Failed => 2,
    }
  }

  fn from_u8(value: u8) -> Self {
    match value {
      1 => JobStatus::Completed,
      2 => JobStatus::Failed,
      _ => JobStatus::Running,
    }
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      JobStatus::Running => f.write_str("running"),
      JobStatus::Completed => f.write_str("completed"),
      JobStatus::Failed => f.write_str("failed"),
    }
  }
}

// ============================================================================
// Error Log
// ============================================================================

/// Fixed-capacity ring of the most recent error messages.
///
/// When full, the oldest entry is evicted and `dropped` is incremented.
#[derive(Debug, Clone)]
pub struct ErrorLog {
  entries: VecDeque<String>,
  capacity: usize,
  dropped: u64,
}

impl ErrorLog {
  pub fn new(capacity: usize) -> Self {
    Self {
      entries: VecDeque::with_capacity(capacity.min(64)),
      capacity,
      dropped: 0,
    }
  }

  pub fn push(&mut self, message: String) {
    if self.capacity == 0 {
      self.dropped += 1;
      return;
    }
    if self.entries.len() == self.capacity {
      self.entries.pop_front();
      self.dropped += 1;
    }
    self.entries.push_back(message);
  }

  /// Entries oldest-first
  pub fn entries(&self) -> Vec<String> {
    self.entries.iter().cloned().collect()
  }

  pub fn dropped(&self) -> u64 {
    self.dropped
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

// ============================================================================
// Job
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
  total: AtomicU64,
  processed: AtomicU64,
  indexed: AtomicU64,
  failed: AtomicU64,
  skipped: AtomicU64,
  images: AtomicU64,
  images_failed: AtomicU64,
  images_skipped_icon: AtomicU64,
  images_skipped_not_found: AtomicU64,
  deferred: AtomicU64,
}

/// Progress record for one ingestion run
#[derive(Debug)]
pub struct Job {
  id: JobId,
  kind: JobKind,
  target: PathBuf,
  started_at: DateTime<Utc>,
  status: AtomicU8,
  counters: Counters,
  errors: Mutex<ErrorLog>,
  fatal_error: Mutex<Option<String>>,
  finished_at: Mutex<Option<DateTime<Utc>>>,
  monitor: Mutex<Option<MonitorSummary>>,
}

impl Job {
  pub fn new(id: JobId, kind: JobKind, target: PathBuf, error_capacity: usize) -> Self {
    Self {
      id,
      kind,
      target,
      started_at: Utc::now(),
      status: AtomicU8::new(JobStatus::Running.as_u8()),
      counters: Counters::default(),
      errors: Mutex::new(ErrorLog::new(error_capacity)),
      fatal_error: Mutex::new(None),
      finished_at: Mutex::new(None),
      monitor: Mutex::new(None),
    }
  }

  pub fn id(&self) -> &JobId {
    &self.id
  }

  pub fn kind(&self) -> JobKind {
    self.kind
  }

  pub fn target(&self) -> &Path {
    &self.target
  }

  pub fn status(&self) -> JobStatus {
    JobStatus::from_u8(self.status.load(Ordering::Acquire))
  }

  pub fn is_running(&self) -> bool {
    self.status() == JobStatus::Running
  }

  // --- worker-side mutation ---

  /// Records found by the producer. Never revised downward.
  pub fn discovered(&self, count: u64) {
    self.counters.total.fetch_add(count, Ordering::Relaxed);
  }

  pub fn record_indexed(&self, count: u64) {
    self.counters.indexed.fetch_add(count, Ordering::Relaxed);
    self.counters.processed.fetch_add(count, Ordering::Relaxed);
  }

  pub fn record_failed(&self, count: u64) {
    self.counters.failed.fetch_add(count, Ordering::Relaxed);
    self.counters.processed.fetch_add(count, Ordering::Relaxed);
  }

  pub fn record_skipped(&self) {
    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_image(&self) {
    self.counters.images.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_image_failure(&self) {
    self.counters.images_failed.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_image_skip(&self, reason: ImageSkip) {
    let counter = match reason {
      ImageSkip::Icon => &self.counters.images_skipped_icon,
      ImageSkip::NotFound => &self.counters.images_skipped_not_found,
    };
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Current length of the deferred image queue
  pub fn set_deferred(&self, queued: usize) {
    self.counters.deferred.store(queued as u64, Ordering::Relaxed);
  }

  pub fn push_error(&self, message: impl Into<String>) {
    self.errors.lock().unwrap_or_else(PoisonError::into_inner).push(message.into());
  }

  pub fn complete(&self, monitor: Option<MonitorSummary>) {
    self.finish(JobStatus::Completed, None, monitor);
  }

  pub fn fail(&self, message: impl Into<String>, monitor: Option<MonitorSummary>) {
    self.finish(JobStatus::Failed, Some(message.into()), monitor);
  }

  fn finish(&self, status: JobStatus, fatal: Option<String>, monitor: Option<MonitorSummary>) {
    *self.fatal_error.lock().unwrap_or_else(PoisonError::into_inner) = fatal;
    *self.finished_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    *self.monitor.lock().unwrap_or_else(PoisonError::into_inner) = monitor;
    self.status.store(status.as_u8(), Ordering::Release);
  }

  // --- reader side ---

  pub fn snapshot(&self) -> JobSnapshot {
    // Status first: an Acquire load of a terminal status makes every write
    // the worker did before finishing visible to the loads below.
    let status = self.status();
    let c = &self.counters;
    let (errors, errors_dropped) = {
      let log = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
      (log.entries(), log.dropped())
    };

    JobSnapshot {
      id: self.id.clone(),
      kind: self.kind,
      target: self.target.clone(),
      status,
      total: c.total.load(Ordering::Relaxed),
      processed: c.processed.load(Ordering::Relaxed),
      indexed: c.indexed.load(Ordering::Relaxed),
      failed: c.failed.load(Ordering::Relaxed),
      skipped: c.skipped.load(Ordering::Relaxed),
      images: c.images.load(Ordering::Relaxed),
      images_failed: c.images_failed.load(Ordering::Relaxed),
      images_skipped_icon: c.images_skipped_icon.load(Ordering::Relaxed),
      images_skipped_not_found: c.images_skipped_not_found.load(Ordering::Relaxed),
      deferred: c.deferred.load(Ordering::Relaxed),
      errors,
      errors_dropped,
      fatal_error: self.fatal_error.lock().unwrap_or_else(PoisonError::into_inner).clone(),
      started_at: self.started_at,
      finished_at: *self.finished_at.lock().unwrap_or_else(PoisonError::into_inner),
      monitor: self.monitor.lock().unwrap_or_else(PoisonError::into_inner).clone(),
    }
  }
}

/// Point-in-time view of a job returned to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
  pub id: JobId,
  pub kind: JobKind,
  pub target: PathBuf,
  pub status: JobStatus,
  pub total: u64,
  pub processed: u64,
  pub indexed: u64,
  pub failed: u64,
  pub skipped: u64,
  pub images: u64,
  pub images_failed: u64,
  pub images_skipped_icon: u64,
  pub images_skipped_not_found: u64,
  pub deferred: u64,
  /// Most recent errors, oldest first
  pub errors: Vec<String>,
  /// Errors evicted from the log
  pub errors_dropped: u64,
  pub fatal_error: Option<String>,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  pub monitor: Option<MonitorSummary>,
}

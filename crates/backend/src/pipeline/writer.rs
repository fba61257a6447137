//! BatchWriter - accumulates documents and commits them to the engine.
//!
//! A flush submits the whole pending batch and waits for the engine task to
//! finish before the worker reads another record. A failed or timed-out
//! commit is charged to the job as `batch size` failures plus one summarized
//! error entry; nothing is retried. The ids of rejected documents are kept so
//! later thumbnail patches can skip them.

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
  domain::{
    config::EngineConfig,
    document::{ImagePatch, IndexDocument},
    job::Job,
  },
  engine::{EngineError, SearchEngine, TaskId},
};

/// Commit timeouts
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
  /// Primary document batches
  pub commit_timeout: Duration,
  /// Small maintenance batches (thumbnail patches)
  pub maintenance_timeout: Duration,
}

impl WriterConfig {
  pub fn from_engine_config(config: &EngineConfig) -> Self {
    Self {
      commit_timeout: config.commit_timeout(),
      maintenance_timeout: config.maintenance_timeout(),
    }
  }
}

/// Result of one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
  pub documents: usize,
  pub committed: bool,
}

/// Totals over the writer's lifetime
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
  pub batches: u64,
  pub failed_batches: u64,
  pub documents_committed: u64,
  pub patches_committed: u64,
}

/// Submit a write and wait for its task, bounded by `timeout`.
pub async fn commit<F>(engine: &dyn SearchEngine, timeout: Duration, submit: F) -> Result<TaskId, EngineError>
where
  F: Future<Output = Result<TaskId, EngineError>>,
{
  let task = submit.await?;
  engine.wait_for_task(task, timeout).await?;
  Ok(task)
}

pub struct BatchWriter {
  engine: Arc<dyn SearchEngine>,
  job: Arc<Job>,
  config: WriterConfig,
  pending: Vec<IndexDocument>,
  /// Documents whose batch failed to commit
  rejected: HashSet<String>,
  stats: WriterStats,
}

impl BatchWriter {
  pub fn new(engine: Arc<dyn SearchEngine>, job: Arc<Job>, config: WriterConfig) -> Self {
    Self {
      engine,
      job,
      config,
      pending: Vec::new(),
      rejected: HashSet::new(),
      stats: WriterStats::default(),
    }
  }

  pub fn pending(&self) -> usize {
    self.pending.len()
  }

  pub fn stats(&self) -> WriterStats {
    self.stats
  }

  /// True when `id` was part of a batch that failed to commit.
  /// A patch for it would create a document holding only image fields.
  pub fn is_rejected(&self, id: &str) -> bool {
    self.rejected.contains(id)
  }

  /// Queue a document; flush once `batch_size` documents are pending.
  pub async fn push(&mut self, document: IndexDocument, batch_size: usize) -> Option<FlushReport> {
    self.pending.push(document);
    if self.pending.len() >= batch_size.max(1) {
      return self.flush().await;
    }
    None
  }

  /// Commit everything pending. Returns `None` when there was nothing to do.
  pub async fn flush(&mut self) -> Option<FlushReport> {
    if self.pending.is_empty() {
      return None;
    }

    let batch = std::mem::take(&mut self.pending);
    let count = batch.len();
    self.stats.batches += 1;

    let engine = self.engine.as_ref();
    let result = commit(engine, self.config.commit_timeout, engine.add_documents(&batch)).await;

    match result {
      Ok(task) => {
        self.job.record_indexed(count as u64);
        self.stats.documents_committed += count as u64;
        debug!(job_id = %self.job.id(), task = task.0, count, "Batch committed");
        Some(FlushReport {
          documents: count,
          committed: true,
        })
      }
      Err(e) => {
        self.job.record_failed(count as u64);
        self.stats.failed_batches += 1;
        self.rejected.extend(batch.into_iter().map(|document| document.id));
        self.job.push_error(format!("Batch of {count} documents failed: {e}"));
        warn!(job_id = %self.job.id(), count, error = %e, "Batch commit failed");
        Some(FlushReport {
          documents: count,
          committed: false,
        })
      }
    }
  }

  /// Apply partial updates under the maintenance timeout.
  pub async fn patch(&mut self, patches: &[ImagePatch]) -> Result<(), EngineError> {
    if patches.is_empty() {
      return Ok(());
    }
    let engine = self.engine.as_ref();
    let task = commit(engine, self.config.maintenance_timeout, engine.update_documents(patches)).await?;
    self.stats.patches_committed += patches.len() as u64;
    debug!(job_id = %self.job.id(), task = task.0, count = patches.len(), "Image patches committed");
    Ok(())
  }
}

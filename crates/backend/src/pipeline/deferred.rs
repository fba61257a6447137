//! Thumbnail adoptions postponed under memory pressure.
//!
//! Every task pushed here leaves the queue exactly once: adopted (counted in
//! `images`), or counted in `images_failed` when adoption fails, when its
//! document never reached the index, or when it is abandoned at shutdown.
//! The job's `deferred` gauge mirrors the queue length after every change.

use std::{collections::VecDeque, path::PathBuf, sync::Arc};

use tracing::{debug, info, warn};

use super::{thumbnails::ThumbnailStore, writer::BatchWriter};
use crate::{
  domain::{config::DeferredConfig, document::ImagePatch, job::Job},
  monitor::ResourceMonitor,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredImageTask {
  pub staging_dir: PathBuf,
  pub doc_id: String,
}

/// What one drain did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
  pub adopted: usize,
  pub failed: usize,
  pub patches_sent: usize,
  pub patch_failures: usize,
}

impl DrainReport {
  pub fn processed(&self) -> usize {
    self.adopted + self.failed
  }
}

pub struct DeferredImageQueue {
  tasks: VecDeque<DeferredImageTask>,
  job: Arc<Job>,
  thumbnails: ThumbnailStore,
  config: DeferredConfig,
}

impl DeferredImageQueue {
  pub fn new(job: Arc<Job>, thumbnails: ThumbnailStore, config: DeferredConfig) -> Self {
    Self {
      tasks: VecDeque::new(),
      job,
      thumbnails,
      config,
    }
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  pub fn push(&mut self, task: DeferredImageTask) {
    self.tasks.push_back(task);
    self.job.set_deferred(self.tasks.len());
  }

  fn pop(&mut self) -> Option<DeferredImageTask> {
    let task = self.tasks.pop_front();
    self.job.set_deferred(self.tasks.len());
    task
  }

  /// Adopt one task's thumbnails. Adoption failures are counted here.
  ///
  /// Documents from a failed batch are not adopted: the patch would upsert a
  /// document with nothing but image fields.
  async fn adopt(&self, task: DeferredImageTask, writer: &BatchWriter) -> Option<ImagePatch> {
    let DeferredImageTask { staging_dir, doc_id } = task;
    if writer.is_rejected(&doc_id) {
      self.job.record_image_failure();
      self.job.push_error(format!("Thumbnails for {doc_id}: document was not indexed"));
      debug!(job_id = %self.job.id(), doc_id, "Skipped thumbnails of unindexed document");
      return None;
    }
    match self.thumbnails.adopt(staging_dir, doc_id.clone()).await {
      Ok(images) => {
        self.job.record_image();
        Some(ImagePatch { id: doc_id, images })
      }
      Err(e) => {
        self.job.record_image_failure();
        self.job.push_error(format!("Thumbnails for {doc_id}: {e}"));
        debug!(job_id = %self.job.id(), doc_id, error = %e, "Deferred adoption failed");
        None
      }
    }
  }

  async fn apply(&self, writer: &mut BatchWriter, patches: Vec<ImagePatch>, report: &mut DrainReport) {
    if patches.is_empty() {
      return;
    }
    let count = patches.len();
    match writer.patch(&patches).await {
      Ok(()) => report.patches_sent += count,
      Err(e) => {
        // Thumbnails are already on disk; only the index lacks the fields.
        report.patch_failures += 1;
        self.job.push_error(format!("Image patch of {count} documents failed: {e}"));
        warn!(job_id = %self.job.id(), count, error = %e, "Image patch failed");
      }
    }
  }

  /// Adopt up to `drain_chunk` tasks and send their patches as one update.
  pub async fn drain_chunk(&mut self, writer: &mut BatchWriter) -> DrainReport {
    let mut report = DrainReport::default();
    let mut patches = Vec::new();

    for _ in 0..self.config.drain_chunk.max(1) {
      let Some(task) = self.pop() else { break };
      match self.adopt(task, writer).await {
        Some(patch) => {
          report.adopted += 1;
          patches.push(patch);
        }
        None => report.failed += 1,
      }
    }

    self.apply(writer, patches, &mut report).await;
    if report.processed() > 0 {
      debug!(
        job_id = %self.job.id(),
        adopted = report.adopted,
        failed = report.failed,
        remaining = self.tasks.len(),
        "Opportunistic image drain"
      );
    }
    report
  }

  /// End-of-stream drain: wait once for memory to settle, then process every
  /// task regardless of pressure.
  pub async fn drain_all(&mut self, monitor: &mut ResourceMonitor, writer: &mut BatchWriter) -> DrainReport {
    let mut report = DrainReport::default();
    if self.tasks.is_empty() {
      return report;
    }

    let queued = self.tasks.len();
    info!(job_id = %self.job.id(), queued, "Draining deferred images");
    let max_wait = monitor.config().cooldown_max_wait();
    if !monitor.wait_for_cooldown(max_wait).await {
      warn!(job_id = %self.job.id(), queued, "Memory still high, draining anyway");
    }

    let patch_batch = self.config.patch_batch.max(1);
    let recheck_wait = monitor.config().cooldown_recheck_wait();
    let mut patches = Vec::with_capacity(patch_batch);

    while let Some(task) = self.pop() {
      match self.adopt(task, writer).await {
        Some(patch) => {
          report.adopted += 1;
          patches.push(patch);
        }
        None => report.failed += 1,
      }

      if patches.len() >= patch_batch {
        self.apply(writer, std::mem::take(&mut patches), &mut report).await;
        if !self.tasks.is_empty() && monitor.above_high() {
          monitor.wait_for_cooldown(recheck_wait).await;
        }
      }
    }
    self.apply(writer, patches, &mut report).await;

    info!(
      job_id = %self.job.id(),
      adopted = report.adopted,
      failed = report.failed,
      patch_failures = report.patch_failures,
      "Deferred image drain complete"
    );
    report
  }

  /// Drop every remaining task, counting each as an image failure.
  pub fn abandon(&mut self, reason: &str) -> usize {
    let count = self.tasks.len();
    if count == 0 {
      return count;
    }
    for _ in 0..count {
      self.job.record_image_failure();
    }
    self.tasks.clear();
    self.job.set_deferred(0);
    self.job.push_error(format!("{count} deferred images abandoned: {reason}"));
    warn!(job_id = %self.job.id(), count, reason, "Deferred images abandoned");
    count
  }
}

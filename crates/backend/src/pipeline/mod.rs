//! Ingestion pipeline - one worker per job.
//!
//! ```text
//!  RecordSource ──▶ normalize ──▶ BatchWriter ──▶ SearchEngine
//!  (stream/walk/zip)   │              ▲
//!                      │ defer?       │ patches
//!                      ▼              │
//!               DeferredImageQueue ───┘
//!                      ▲
//!               ResourceMonitor (batch size, defer flag, sleep)
//! ```
//!
//! Production, batching and commit are sequential inside a worker. The
//! worker is the only writer of its [`Job`]; everything it learns ends up in
//! the job's counters or error log, never in a returned error.

pub mod archive;
pub mod deferred;
pub mod extract;
pub mod extraction;
pub mod folder;
pub mod source;
pub mod thumbnails;
pub mod writer;

#[cfg(test)]
mod __tests__;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Instant,
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use self::{
  archive::ArchiveReader,
  deferred::{DeferredImageQueue, DeferredImageTask},
  extract::TextExtractor,
  extraction::ExtractionStream,
  folder::{EntryFilter, FolderWalker},
  source::{RecordSource, SourceError, SourceEvent, SourceOutcome},
  thumbnails::ThumbnailStore,
  writer::{BatchWriter, WriterConfig},
};
use crate::{
  domain::{
    config::Config,
    document::{ExtractionRecord, IndexDocument, Provenance, SourceKind, extension_of},
    job::{Job, JobKind},
  },
  engine::SearchEngine,
  monitor::{ProbeFactory, ResourceMonitor},
};

/// Fatal message for jobs stopped by [`JobRegistry::shutdown`](crate::jobs::JobRegistry::shutdown)
pub const INTERRUPTED: &str = "interrupted by shutdown";

/// Shared, read-only dependencies of every worker
pub struct PipelineContext {
  pub config: Arc<Config>,
  pub engine: Arc<dyn SearchEngine>,
  pub thumbnails: ThumbnailStore,
  pub probes: ProbeFactory,
  /// Per-job staging directories are created below this
  pub staging_root: PathBuf,
}

impl PipelineContext {
  pub fn new(config: Arc<Config>, engine: Arc<dyn SearchEngine>, probes: ProbeFactory) -> Self {
    let thumbnails = ThumbnailStore::new(config.ingest.thumbnail_dir(), &config.ingest.thumbnail_url_prefix);
    let staging_root = config.ingest.staging_dir();
    Self {
      config,
      engine,
      thumbnails,
      probes,
      staging_root,
    }
  }

  fn staging_dir(&self, job: &Job) -> PathBuf {
    self.staging_root.join(job.id().as_str())
  }
}

/// Run `job` to a terminal state.
pub async fn run_job(ctx: Arc<PipelineContext>, job: Arc<Job>, cancel: CancellationToken) {
  let staging = ctx.staging_dir(&job);
  info!(job_id = %job.id(), kind = %job.kind(), target = %job.target().display(), "Job started");

  let source = match open_source(&ctx, &job, &staging) {
    Ok(source) => source,
    Err(e) => {
      warn!(job_id = %job.id(), error = %e, "Job could not start");
      remove_staging(&staging).await;
      job.fail(e.to_string(), None);
      return;
    }
  };

  let worker = Worker::new(&ctx, job.clone(), source.provenance().clone());
  worker.run(source, &cancel).await;
  remove_staging(&staging).await;

  let snap = job.snapshot();
  info!(
    job_id = %snap.id,
    status = %snap.status,
    total = snap.total,
    processed = snap.processed,
    indexed = snap.indexed,
    failed = snap.failed,
    skipped = snap.skipped,
    images = snap.images,
    images_failed = snap.images_failed,
    adjustments = snap.monitor.as_ref().map(|m| m.adjustments).unwrap_or(0),
    "Job finished"
  );
}

fn open_source(ctx: &PipelineContext, job: &Job, staging: &Path) -> Result<Box<dyn RecordSource>, SourceError> {
  let target = job.target();
  let config = &ctx.config;
  let filter = EntryFilter::new(&config.ingest.allowed_extensions);
  let extractor = TextExtractor::from_config(&config.extractor);

  match job.kind() {
    JobKind::FolderSync => Ok(Box::new(FolderWalker::spawn(target, filter, extractor)?)),
    JobKind::ArchiveIndex => {
      if !target.is_file() {
        return Err(SourceError::NotFound(target.to_path_buf()));
      }
      let ext = extension_of(&target.to_string_lossy()).to_lowercase();
      match ext.as_str() {
        "zim" => {
          std::fs::create_dir_all(staging)?;
          let provenance = Provenance::new(SourceKind::Zim, target);
          Ok(Box::new(ExtractionStream::spawn(&config.extractor, target, staging, provenance)?))
        }
        "zip" => Ok(Box::new(ArchiveReader::spawn(
          target,
          staging.join("scratch"),
          filter,
          extractor,
        )?)),
        _ => Err(SourceError::UnsupportedArchive(target.to_path_buf())),
      }
    }
  }
}

async fn remove_staging(staging: &Path) {
  match tokio::fs::remove_dir_all(staging).await {
    Ok(()) => debug!(path = %staging.display(), "Removed staging directory"),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %staging.display(), error = %e, "Failed to remove staging directory"),
  }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker<'a> {
  ctx: &'a PipelineContext,
  job: Arc<Job>,
  provenance: Provenance,
  monitor: ResourceMonitor,
  writer: BatchWriter,
  deferred: DeferredImageQueue,
  records: u64,
  started: Instant,
}

impl<'a> Worker<'a> {
  fn new(ctx: &'a PipelineContext, job: Arc<Job>, provenance: Provenance) -> Self {
    let config = &ctx.config;
    Self {
      monitor: ResourceMonitor::new(config.monitor.clone(), (ctx.probes)()),
      writer: BatchWriter::new(
        ctx.engine.clone(),
        job.clone(),
        WriterConfig::from_engine_config(&config.engine),
      ),
      deferred: DeferredImageQueue::new(job.clone(), ctx.thumbnails.clone(), config.deferred.clone()),
      ctx,
      job,
      provenance,
      records: 0,
      started: Instant::now(),
    }
  }

  async fn run(mut self, mut source: Box<dyn RecordSource>, cancel: &CancellationToken) {
    let interrupted = loop {
      let event = tokio::select! {
        biased;
        _ = cancel.cancelled() => break true,
        event = source.next() => event,
      };
      match event {
        Some(event) => self.handle_event(event).await,
        None => break false,
      }
    };

    let outcome = source.finish().await;
    self.writer.flush().await;

    if interrupted {
      self.deferred.abandon(INTERRUPTED);
    } else {
      self.deferred.drain_all(&mut self.monitor, &mut self.writer).await;
    }

    let stats = self.writer.stats();
    debug!(
      job_id = %self.job.id(),
      batches = stats.batches,
      failed_batches = stats.failed_batches,
      documents_committed = stats.documents_committed,
      patches_committed = stats.patches_committed,
      "Writer totals"
    );

    self.conclude(outcome, interrupted);
  }

  fn conclude(&self, outcome: SourceOutcome, interrupted: bool) {
    let summary = Some(self.monitor.summary());
    if interrupted {
      // A killed extractor looks fatal; the interruption is the cause.
      if let Some(fatal) = outcome.fatal {
        self.job.push_error(fatal);
      }
      self.job.fail(INTERRUPTED, summary);
    } else if let Some(fatal) = outcome.fatal {
      warn!(job_id = %self.job.id(), error = %fatal, "Job failed");
      self.job.fail(fatal, summary);
    } else {
      if let Some(anomaly) = outcome.anomaly {
        warn!(job_id = %self.job.id(), anomaly = %anomaly, "Extractor ended abnormally");
        self.job.push_error(anomaly);
      }
      self.job.complete(summary);
    }
  }

  async fn handle_event(&mut self, event: SourceEvent) {
    match event {
      SourceEvent::Discovered(count) => self.job.discovered(count),
      SourceEvent::Skipped { entry } => {
        trace!(job_id = %self.job.id(), entry, "Skipped");
        self.job.record_skipped();
      }
      SourceEvent::Failed { entry, reason } => {
        self.job.record_failed(1);
        self.job.push_error(format!("{entry}: {reason}"));
        self.tick();
      }
      SourceEvent::Notice(message) => {
        warn!(job_id = %self.job.id(), message, "Producer notice");
        self.job.push_error(message);
      }
      SourceEvent::Record(record) => self.handle_record(record).await,
    }
  }

  async fn handle_record(&mut self, record: ExtractionRecord) {
    let control = self.monitor.check();
    let ingest = &self.ctx.config.ingest;

    if let Some(reason) = record.skip_reason() {
      self.job.record_image_skip(reason);
    }

    let chars = record.meaningful_chars();
    if chars < ingest.min_text_chars {
      self.job.record_failed(1);
      self.job.push_error(format!("{}: text too short ({chars} chars)", record.path));
      self.tick();
      return;
    }

    let mut document = IndexDocument::from_record(&self.provenance, &record, ingest.max_content_chars);
    if let Some(staging_dir) = record.staging_dir() {
      if control.defer_images {
        self.deferred.push(DeferredImageTask {
          staging_dir,
          doc_id: document.id.clone(),
        });
      } else {
        match self.ctx.thumbnails.adopt(staging_dir, document.id.clone()).await {
          Ok(images) => {
            document.images = images;
            self.job.record_image();
          }
          Err(e) => {
            self.job.record_image_failure();
            self.job.push_error(format!("Thumbnails for {}: {e}", record.path));
          }
        }
      }
    }

    let flushed = self.writer.push(document, control.batch_size).await.is_some();
    if flushed {
      if !control.sleep.is_zero() {
        tokio::time::sleep(control.sleep).await;
      }
      // Only after a flush: every queued task's document has then been
      // committed or rejected, so a patch cannot be overwritten by a later add.
      if !self.deferred.is_empty() && self.monitor.is_safe_for_deferred() {
        self.deferred.drain_chunk(&mut self.writer).await;
      }
    }
    self.tick();
  }

  fn tick(&mut self) {
    self.records += 1;
    let interval = self.ctx.config.ingest.progress_log_interval;
    if interval == 0 || self.records % interval != 0 {
      return;
    }

    let snap = self.job.snapshot();
    let elapsed = self.started.elapsed().as_secs_f64().max(0.001);
    let control = self.monitor.state();
    info!(
      job_id = %snap.id,
      processed = snap.processed,
      total = snap.total,
      rate = (self.records as f64 / elapsed).round() as u64,
      batch_size = control.batch_size,
      defer_images = control.defer_images,
      deferred = snap.deferred,
      "Progress"
    );
  }
}

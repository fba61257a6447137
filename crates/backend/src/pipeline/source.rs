//! The producer contract shared by every ingestion path.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::domain::document::{ExtractionRecord, Provenance};

/// Events buffered between a blocking producer thread and the worker
const CHANNEL_DEPTH: usize = 64;

/// What a producer hands the worker
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
  /// `n` more records were found; counted into `total` immediately
  Discovered(u64),
  /// Entry filtered out before extraction
  Skipped { entry: String },
  /// A record ready for normalization
  Record(ExtractionRecord),
  /// Entry was discovered but could not be extracted
  Failed { entry: String, reason: String },
  /// Informational problem that affects no counter (e.g. an unreadable subdirectory)
  Notice(String),
}

/// How a producer ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOutcome {
  /// Records emitted over the producer's lifetime
  pub records: u64,
  /// Non-fatal anomaly to record in the job's error log
  pub anomaly: Option<String>,
  /// Job-fatal condition
  pub fatal: Option<String>,
}

/// A finite, non-restartable sequence of [`SourceEvent`]s.
///
/// `next` returns `None` once the producer is exhausted and keeps returning
/// `None` afterwards. `finish` releases the producer's resources (processes,
/// threads) and reports how it ended.
#[async_trait]
pub trait RecordSource: Send {
  fn provenance(&self) -> &Provenance;

  async fn next(&mut self) -> Option<SourceEvent>;

  async fn finish(self: Box<Self>) -> SourceOutcome;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
  #[error("Target not found: {0}")]
  NotFound(PathBuf),
  #[error("Unsupported archive type: {0}")]
  UnsupportedArchive(PathBuf),
  #[error("Could not run extractor `{command}`: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Cannot read {path}: {message}")]
  Unreadable { path: PathBuf, message: String },
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

// ============================================================================
// Blocking producers
// ============================================================================

/// Sending half handed to a blocking producer.
pub struct EventSender(mpsc::Sender<SourceEvent>);

impl EventSender {
  /// Blocks while the channel is full. Returns false once the worker has
  /// stopped listening; the producer should return.
  pub fn send(&self, event: SourceEvent) -> bool {
    self.0.blocking_send(event).is_ok()
  }
}

/// Runs a synchronous producer on the blocking pool and exposes its events as
/// a [`RecordSource`]. The producer returns `Err(message)` for job-fatal
/// conditions.
pub struct BlockingSource {
  provenance: Provenance,
  rx: mpsc::Receiver<SourceEvent>,
  worker: JoinHandle<Result<(), String>>,
  records: u64,
}

impl BlockingSource {
  pub fn spawn<F>(provenance: Provenance, produce: F) -> Self
  where
    F: FnOnce(EventSender) -> Result<(), String> + Send + 'static,
  {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let worker = tokio::task::spawn_blocking(move || produce(EventSender(tx)));
    Self {
      provenance,
      rx,
      worker,
      records: 0,
    }
  }
}

#[async_trait]
impl RecordSource for BlockingSource {
  fn provenance(&self) -> &Provenance {
    &self.provenance
  }

  async fn next(&mut self) -> Option<SourceEvent> {
    let event = self.rx.recv().await?;
    if matches!(event, SourceEvent::Record(_)) {
      self.records += 1;
    }
    Some(event)
  }

  async fn finish(self: Box<Self>) -> SourceOutcome {
    let Self { rx, worker, records, .. } = *self;
    // Unblocks a producer parked on a full channel
    drop(rx);

    let fatal = match worker.await {
      Ok(Ok(())) => None,
      Ok(Err(message)) => Some(message),
      Err(e) => Some(format!("Producer task failed: {e}")),
    };
    SourceOutcome {
      records,
      anomaly: None,
      fatal,
    }
  }
}

//! ExtractionStream - the external extractor in streaming mode.
//!
//! The extractor writes one JSON record per line on stdout. Lines are read
//! only when the worker asks for the next record, so a slow consumer stalls
//! the extractor through the pipe buffer. The stream owns the child process:
//! [`ExtractionStream::close`] waits for it with a bound and kills it if it
//! does not exit in time.

use std::{
  path::Path,
  process::{ExitStatus, Stdio},
  time::Duration,
};

use async_trait::async_trait;
use tokio::{
  io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines},
  process::{Child, ChildStderr, ChildStdout, Command},
  task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::source::{RecordSource, SourceError, SourceEvent, SourceOutcome};
use crate::domain::{
  config::ExtractorConfig,
  document::{ExtractionRecord, Provenance},
};

/// Bytes of extractor stderr kept for diagnostics
const STDERR_TAIL_BYTES: usize = 8 * 1024;
/// Characters of stderr quoted in job errors
const STDERR_QUOTE_CHARS: usize = 500;

/// How the extractor process ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
  pub records: u64,
  pub malformed: u64,
  pub exit_code: Option<i32>,
  pub stderr: String,
  /// The process had to be killed after the exit grace period
  pub killed: bool,
}

impl StreamOutcome {
  pub fn succeeded(&self) -> bool {
    self.exit_code == Some(0)
  }

  /// Zero records and an unsuccessful exit means nothing useful happened
  pub fn is_fatal(&self) -> bool {
    self.records == 0 && !self.succeeded()
  }

  fn exit_description(&self) -> String {
    match (self.exit_code, self.killed) {
      (_, true) => "extractor did not exit and was killed".to_string(),
      (Some(code), _) => format!("extractor exited with code {code}"),
      (None, _) => "extractor terminated by signal".to_string(),
    }
  }

  fn stderr_quote(&self) -> String {
    let trimmed = self.stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_QUOTE_CHARS {
      return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_QUOTE_CHARS).collect()
  }

  /// Job-fatal message, if the outcome is fatal
  pub fn fatal_message(&self) -> Option<String> {
    if !self.is_fatal() {
      return None;
    }
    let quote = self.stderr_quote();
    Some(if quote.is_empty() { self.exit_description() } else { quote })
  }

  /// Informational note for a run that produced records but ended badly
  pub fn anomaly_message(&self) -> Option<String> {
    if self.succeeded() || self.is_fatal() {
      return None;
    }
    let quote = self.stderr_quote();
    let mut message = format!("{} after {} records", self.exit_description(), self.records);
    if !quote.is_empty() {
      message.push_str(": ");
      message.push_str(&quote);
    }
    Some(message)
  }
}

pub struct ExtractionStream {
  child: Child,
  lines: Option<Lines<BufReader<ChildStdout>>>,
  stderr: Option<JoinHandle<String>>,
  provenance: Provenance,
  pending: Option<ExtractionRecord>,
  records: u64,
  malformed: u64,
  exit_timeout: Duration,
}

impl ExtractionStream {
  /// Launch `<command> <args..> --zim <archive> --extract-images <staging>`.
  pub fn spawn(
    config: &ExtractorConfig,
    archive: &Path,
    staging: &Path,
    provenance: Provenance,
  ) -> Result<Self, SourceError> {
    let mut child = Command::new(&config.command)
      .args(&config.args)
      .arg("--zim")
      .arg(archive)
      .arg("--extract-images")
      .arg(staging)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| SourceError::Spawn {
        command: config.command.clone(),
        source,
      })?;

    let stdout = child.stdout.take().ok_or_else(|| SourceError::Unreadable {
      path: archive.to_path_buf(),
      message: "extractor stdout was not captured".to_string(),
    })?;
    let stderr = child.stderr.take().map(|s| tokio::spawn(collect_stderr(s)));

    info!(
      command = %config.command,
      archive = %archive.display(),
      pid = child.id(),
      "Extractor started"
    );

    Ok(Self {
      child,
      lines: Some(BufReader::new(stdout).lines()),
      stderr,
      provenance,
      pending: None,
      records: 0,
      malformed: 0,
      exit_timeout: Duration::from_secs(config.exit_timeout_secs),
    })
  }

  /// Next decoded record, or `None` once the extractor closed its output.
  pub async fn next_record(&mut self) -> Option<ExtractionRecord> {
    loop {
      let lines = self.lines.as_mut()?;
      match lines.next_line().await {
        Ok(Some(line)) => {
          let line = line.trim();
          if line.is_empty() {
            continue;
          }
          match serde_json::from_str::<ExtractionRecord>(line) {
            Ok(record) => {
              self.records += 1;
              trace!(path = %record.path, "Decoded extractor record");
              return Some(record);
            }
            Err(e) => {
              self.malformed += 1;
              debug!(error = %e, "Skipping undecodable extractor line");
            }
          }
        }
        Ok(None) => {
          self.lines = None;
          return None;
        }
        Err(e) => {
          warn!(error = %e, "Extractor output read failed");
          self.lines = None;
          return None;
        }
      }
    }
  }

  /// Close the output, reap the process, and report how it ended.
  pub async fn close(mut self) -> StreamOutcome {
    // Dropping stdout lets a still-writing extractor fail fast with EPIPE.
    self.lines = None;

    let mut killed = false;
    let status: Option<ExitStatus> = match tokio::time::timeout(self.exit_timeout, self.child.wait()).await {
      Ok(Ok(status)) => Some(status),
      Ok(Err(e)) => {
        warn!(error = %e, "Failed to wait for extractor");
        None
      }
      Err(_) => {
        warn!(
          timeout_secs = self.exit_timeout.as_secs(),
          "Extractor did not exit in time, killing it"
        );
        killed = true;
        if let Err(e) = self.child.kill().await {
          warn!(error = %e, "Failed to kill extractor");
        }
        None
      }
    };

    let stderr = match self.stderr.take() {
      Some(handle) => match tokio::time::timeout(Duration::from_secs(2), handle).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
      },
      None => String::new(),
    };

    let outcome = StreamOutcome {
      records: self.records,
      malformed: self.malformed,
      exit_code: status.and_then(|s| s.code()),
      stderr,
      killed,
    };

    if !outcome.stderr.trim().is_empty() {
      info!(stderr = %outcome.stderr_quote(), "Extractor diagnostics");
    }
    debug!(
      records = outcome.records,
      malformed = outcome.malformed,
      exit_code = ?outcome.exit_code,
      killed = outcome.killed,
      "Extractor finished"
    );
    outcome
  }
}

async fn collect_stderr(mut stderr: ChildStderr) -> String {
  let mut tail: Vec<u8> = Vec::new();
  let mut buf = [0u8; 4096];
  loop {
    match stderr.read(&mut buf).await {
      Ok(0) | Err(_) => break,
      Ok(n) => {
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > STDERR_TAIL_BYTES {
          let excess = tail.len() - STDERR_TAIL_BYTES;
          tail.drain(..excess);
        }
      }
    }
  }
  String::from_utf8_lossy(&tail).into_owned()
}

#[async_trait]
impl RecordSource for ExtractionStream {
  fn provenance(&self) -> &Provenance {
    &self.provenance
  }

  /// Each decoded record is announced as `Discovered(1)` before it is handed
  /// out, so `total` advances only for decodable lines.
  async fn next(&mut self) -> Option<SourceEvent> {
    if let Some(record) = self.pending.take() {
      return Some(SourceEvent::Record(record));
    }
    let record = self.next_record().await?;
    self.pending = Some(record);
    Some(SourceEvent::Discovered(1))
  }

  async fn finish(self: Box<Self>) -> SourceOutcome {
    let outcome = self.close().await;
    SourceOutcome {
      records: outcome.records,
      anomaly: outcome.anomaly_message(),
      fatal: outcome.fatal_message(),
    }
  }
}

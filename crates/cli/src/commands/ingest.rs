//! Foreground ingestion command

use std::{
  io::{IsTerminal, Write},
  path::Path,
  time::Duration,
};

use anyhow::{Context, Result, bail};
use corpusd::{
  App,
  config::Config,
  job::{JobKind, JobSnapshot, JobStatus},
};
use tracing::info;

use crate::format::{job_summary, progress_line};

/// Submit one job and follow it to a terminal state.
///
/// Ctrl-C interrupts the job through `App::shutdown` and still reports the
/// final snapshot. Returns an error when the job fails.
pub async fn cmd_ingest(config: Config, kind: JobKind, path: &Path, json: bool, interval: Duration) -> Result<()> {
  let app = App::new(config).context("Failed to start ingestion service")?;
  let registry = app.registry();

  let submission = registry.submit(kind, path);
  let id = submission.id().clone();
  info!(job_id = %id, %kind, path = %path.display(), "Following job");

  let live = !json && std::io::stderr().is_terminal();
  let mut ticker = tokio::time::interval(interval);
  let mut interrupted = false;

  let snapshot = loop {
    tokio::select! {
      _ = ticker.tick() => {
        let Some(snap) = registry.get(&id) else {
          bail!("Job {id} is no longer known to the registry");
        };
        if snap.status.is_terminal() {
          break snap;
        }
        if live {
          eprint!("\r{}", progress_line(&snap));
          let _ = std::io::stderr().flush();
        }
      }
      signal = tokio::signal::ctrl_c(), if !interrupted => {
        signal.context("Failed to listen for Ctrl-C")?;
        interrupted = true;
        if live {
          eprintln!();
        }
        eprintln!("Interrupted, stopping job {id}...");
        app.shutdown().await;
      }
    }
  };

  if live {
    eprintln!();
  }
  report(&snapshot, json)?;

  if snapshot.status == JobStatus::Failed {
    bail!(
      "Job {id} failed: {}",
      snapshot.fatal_error.as_deref().unwrap_or("unknown error")
    );
  }
  app.shutdown().await;
  Ok(())
}

fn report(snapshot: &JobSnapshot, json: bool) -> Result<()> {
  if json {
    let body = serde_json::to_string_pretty(snapshot).context("Failed to serialize job snapshot")?;
    println!("{body}");
  } else {
    print!("{}", job_summary(snapshot));
  }
  Ok(())
}

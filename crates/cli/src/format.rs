//! Human-readable rendering of job snapshots and resource samples.

use std::fmt::Write as _;

use corpusd::{job::JobSnapshot, monitor::ResourceSample};

/// One-line progress for a running job
pub fn progress_line(snap: &JobSnapshot) -> String {
  let percent = if snap.total > 0 {
    format!("{:>3}%", (snap.processed * 100 / snap.total).min(100))
  } else {
    "  -%".to_string()
  };
  let mut line = format!(
    "{percent} {}/{} processed, {} indexed, {} failed",
    snap.processed, snap.total, snap.indexed, snap.failed
  );
  if snap.images + snap.images_failed > 0 {
    let _ = write!(line, ", {} images", snap.images);
  }
  if snap.deferred > 0 {
    let _ = write!(line, ", {} deferred", snap.deferred);
  }
  line
}

/// Multi-line report for a finished job
pub fn job_summary(snap: &JobSnapshot) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "Job {} ({}) {}", snap.id, snap.kind, snap.status);
  let _ = writeln!(out, "  Target:    {}", snap.target.display());
  if let Some(finished) = snap.finished_at {
    let seconds = (finished - snap.started_at).num_seconds().max(0) as u64;
    let _ = writeln!(out, "  Duration:  {}", format_duration(seconds));
  }
  let _ = writeln!(
    out,
    "  Documents: {} indexed, {} failed, {} skipped ({} discovered)",
    snap.indexed, snap.failed, snap.skipped, snap.total
  );

  let images_seen = snap.images + snap.images_failed + snap.images_skipped_icon + snap.images_skipped_not_found;
  if images_seen > 0 {
    let _ = writeln!(
      out,
      "  Images:    {} adopted, {} failed, {} icons skipped, {} not found",
      snap.images, snap.images_failed, snap.images_skipped_icon, snap.images_skipped_not_found
    );
  }

  if let Some(monitor) = &snap.monitor {
    let _ = writeln!(
      out,
      "  Monitor:   {} samples, {} adjustments, {} cooldowns, final batch {}",
      monitor.samples, monitor.adjustments, monitor.cooldowns, monitor.final_batch_size
    );
  }

  if let Some(fatal) = &snap.fatal_error {
    let _ = writeln!(out, "  Error:     {fatal}");
  }

  if !snap.errors.is_empty() {
    let _ = writeln!(out, "  Recent errors:");
    for error in &snap.errors {
      let _ = writeln!(out, "    - {error}");
    }
    if snap.errors_dropped > 0 {
      let _ = writeln!(out, "    ({} older errors dropped)", snap.errors_dropped);
    }
  }
  out
}

/// Sample plus the control outputs it produces
pub fn resource_report(sample: &ResourceSample) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "Memory usage:  {:.1}%", sample.memory_usage * 100.0);
  let _ = writeln!(out, "Process RSS:   {}", format_memory(sample.process_rss / 1024));
  let _ = writeln!(
    out,
    "Load (1 min):  {:.2} across {} CPUs (ratio {:.2})",
    sample.load_one, sample.cpus, sample.load_ratio
  );
  let _ = writeln!(out, "Pressure band: {:?}", sample.band);
  let _ = writeln!(out);
  let _ = writeln!(out, "Batch size:    {}", sample.control.batch_size);
  let _ = writeln!(
    out,
    "Images:        {}",
    if sample.control.defer_images { "deferred" } else { "inline" }
  );
  let _ = writeln!(out, "Flush sleep:   {} ms", sample.control.sleep.as_millis());
  out
}

/// Format duration in human-readable form
pub fn format_duration(seconds: u64) -> String {
  if seconds < 60 {
    format!("{} seconds", seconds)
  } else if seconds < 3600 {
    let mins = seconds / 60;
    let secs = seconds % 60;
    if secs > 0 {
      format!("{} min {} sec", mins, secs)
    } else {
      format!("{} minutes", mins)
    }
  } else {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    if mins > 0 {
      format!("{} hr {} min", hours, mins)
    } else {
      format!("{} hours", hours)
    }
  }
}

/// Format memory size in human-readable form
pub fn format_memory(kb: u64) -> String {
  if kb < 1024 {
    format!("{} KB", kb)
  } else if kb < 1024 * 1024 {
    format!("{:.1} MB", kb as f64 / 1024.0)
  } else {
    format!("{:.2} GB", kb as f64 / (1024.0 * 1024.0))
  }
}

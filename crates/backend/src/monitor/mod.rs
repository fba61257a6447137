//! ResourceMonitor - adaptive control loop over host memory and CPU load.
//!
//! The monitor is sampled every `sample_interval` records and turns each
//! sample into three control outputs: the batch size for the writer, whether
//! image adoption should be deferred, and a sleep applied after each flush.
//!
//! ```text
//!  usage  0.0 ──── 0.50 ──────── 0.65 ──── 0.80 ──── 0.90 ──── 1.0
//!          │  low   │ dead zone   │ moderate │  high   │ critical
//!          │ grow   │ (no change) │ shrink   │ ⅔,defer │ min,defer,cooldown
//! ```
//!
//! CPU pressure (load1 / cores) composes on top and can only tighten the
//! memory decision: above `load_high` the batch is halved and the sleep is
//! raised to a floor, above `load_elevated` only the sleep floor applies.

mod probe;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[cfg(test)]
pub use probe::ScriptedProbe;
pub use probe::{ProbeFactory, ProbeReading, ResourceProbe, SysinfoProbe, sysinfo_probe_factory};

use crate::domain::config::MonitorConfig;

/// The three outputs the pipeline consumes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
  pub batch_size: usize,
  pub defer_images: bool,
  pub sleep: Duration,
}

impl ControlState {
  pub fn initial(config: &MonitorConfig) -> Self {
    Self {
      batch_size: config.batch_default.clamp(config.batch_min, config.batch_max),
      defer_images: false,
      sleep: Duration::ZERO,
    }
  }
}

/// Memory pressure regime selected by a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
  Critical,
  High,
  Moderate,
  DeadZone,
  Low,
}

impl Band {
  pub fn classify(config: &MonitorConfig, usage: f64) -> Self {
    if usage >= config.memory_critical {
      Band::Critical
    } else if usage >= config.memory_high {
      Band::High
    } else if usage >= config.memory_moderate {
      Band::Moderate
    } else if usage < config.memory_low {
      Band::Low
    } else {
      Band::DeadZone
    }
  }
}

/// Apply one sample to the current control state.
///
/// Pure so the ladder can be exercised without a probe.
pub fn adjust(config: &MonitorConfig, current: ControlState, usage: f64, load_ratio: f64) -> (ControlState, Band) {
  let band = Band::classify(config, usage);
  let min = config.batch_min;
  let max = config.batch_max;
  let mut next = current;

  match band {
    Band::Critical => {
      next.batch_size = min;
      next.defer_images = true;
      next.sleep = Duration::from_millis(config.critical_sleep_ms);
    }
    Band::High => {
      next.batch_size = (current.batch_size * 2 / 3).max(min);
      next.defer_images = true;
      next.sleep = Duration::from_millis(config.high_sleep_ms);
    }
    Band::Moderate => {
      next.batch_size = current.batch_size.saturating_sub(config.batch_step_down).max(min);
      next.defer_images = false;
      next.sleep = Duration::from_millis(config.moderate_sleep_ms);
    }
    Band::Low => {
      next.batch_size = (current.batch_size + config.batch_step_up).min(max);
      next.defer_images = false;
      next.sleep = Duration::ZERO;
    }
    Band::DeadZone => {}
  }

  if load_ratio > config.load_high {
    next.sleep = next.sleep.max(Duration::from_millis(config.load_high_sleep_ms));
    next.batch_size = (next.batch_size / 2).max(min);
  } else if load_ratio > config.load_elevated {
    next.sleep = next.sleep.max(Duration::from_millis(config.load_elevated_sleep_ms));
  }

  next.batch_size = next.batch_size.clamp(min, max);
  (next, band)
}

/// One telemetry sample together with the decision it produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
  pub memory_usage: f64,
  pub process_rss: u64,
  pub load_one: f64,
  pub load_ratio: f64,
  pub cpus: usize,
  pub band: Band,
  pub control: ControlState,
}

/// Totals published on the job when it finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
  pub samples: u64,
  pub adjustments: u64,
  pub cooldowns: u64,
  pub final_batch_size: usize,
  pub last_memory_usage: f64,
}

pub struct ResourceMonitor {
  config: MonitorConfig,
  probe: Box<dyn ResourceProbe>,
  state: ControlState,
  checks: u64,
  samples: u64,
  adjustments: u64,
  cooldowns: u64,
  last_usage: f64,
}

impl ResourceMonitor {
  pub fn new(config: MonitorConfig, probe: Box<dyn ResourceProbe>) -> Self {
    let state = ControlState::initial(&config);
    debug!(
      cpus = probe.cpu_count(),
      batch_size = state.batch_size,
      sample_interval = config.sample_interval,
      "Resource monitor starting"
    );
    Self {
      config,
      probe,
      state,
      checks: 0,
      samples: 0,
      adjustments: 0,
      cooldowns: 0,
      last_usage: 0.0,
    }
  }

  pub fn config(&self) -> &MonitorConfig {
    &self.config
  }

  pub fn state(&self) -> ControlState {
    self.state
  }

  /// Count one record; re-sample every `sample_interval` calls.
  pub fn check(&mut self) -> ControlState {
    self.checks += 1;
    if self.checks % self.config.sample_interval.max(1) == 0 {
      self.sample_now();
    }
    self.state
  }

  /// Take a sample immediately and apply it.
  pub fn sample_now(&mut self) -> Option<ResourceSample> {
    let reading = self.probe.read();
    let usage = reading.memory_usage()?;
    let cpus = self.probe.cpu_count().max(1);
    let load_ratio = reading.load_one / cpus as f64;

    let previous = self.state;
    let (next, band) = adjust(&self.config, previous, usage, load_ratio);
    self.samples += 1;
    self.last_usage = usage;
    if band == Band::Critical {
      self.cooldowns += 1;
    }

    if next != previous {
      self.adjustments += 1;
      info!(
        adjustment = self.adjustments,
        memory_pct = (usage * 100.0).round() as u64,
        rss_mb = reading.process_rss / (1024 * 1024),
        load_one = reading.load_one,
        cpus,
        ?band,
        batch_size = next.batch_size,
        defer_images = next.defer_images,
        sleep_ms = next.sleep.as_millis() as u64,
        "Resource monitor adjusted"
      );
    }

    self.state = next;
    let sample = ResourceSample {
      memory_usage: usage,
      process_rss: reading.process_rss,
      load_one: reading.load_one,
      load_ratio,
      cpus,
      band,
      control: next,
    };
    Some(sample)
  }

  /// Cheap check against the last cached usage; no syscall.
  pub fn is_safe_for_deferred(&self) -> bool {
    self.last_usage < self.config.memory_moderate
  }

  /// Fresh memory usage. Updates the cached value used by
  /// [`is_safe_for_deferred`](Self::is_safe_for_deferred).
  pub fn memory_usage(&mut self) -> Option<f64> {
    let usage = self.probe.memory_usage()?;
    self.last_usage = usage;
    Some(usage)
  }

  pub fn above_high(&mut self) -> bool {
    self.memory_usage().is_some_and(|usage| usage > self.config.memory_high)
  }

  /// Poll memory until it drops below the high threshold or `max_wait`
  /// elapses. Returns whether memory recovered; a timeout is not an error.
  pub async fn wait_for_cooldown(&mut self, max_wait: Duration) -> bool {
    let deadline = Instant::now() + max_wait;
    loop {
      match self.memory_usage() {
        Some(usage) if usage < self.config.memory_high => {
          info!(memory_pct = (usage * 100.0).round() as u64, "Cooldown complete");
          return true;
        }
        None => return true,
        Some(_) => {}
      }

      let now = Instant::now();
      if now >= deadline {
        warn!(max_wait_ms = max_wait.as_millis() as u64, "Cooldown timed out");
        return false;
      }
      tokio::time::sleep(self.config.cooldown_poll().min(deadline - now)).await;
    }
  }

  pub fn summary(&self) -> MonitorSummary {
    MonitorSummary {
      samples: self.samples,
      adjustments: self.adjustments,
      cooldowns: self.cooldowns,
      final_batch_size: self.state.batch_size,
      last_memory_usage: self.last_usage,
    }
  }
}

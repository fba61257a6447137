//! OS telemetry behind a trait so the control loop can be driven by scripted
//! readings in tests.

use std::sync::Arc;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Raw telemetry for one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
  /// Bytes
  pub total_memory: u64,
  /// Bytes the kernel considers available for new allocations
  pub available_memory: u64,
  /// Resident set size of this process in bytes
  pub process_rss: u64,
  /// One-minute load average
  pub load_one: f64,
}

impl ProbeReading {
  /// 1 - available/total, or `None` when total is unknown
  pub fn memory_usage(&self) -> Option<f64> {
    if self.total_memory == 0 {
      return None;
    }
    let available = self.available_memory.min(self.total_memory) as f64;
    Some(1.0 - available / self.total_memory as f64)
  }
}

pub trait ResourceProbe: Send {
  fn read(&mut self) -> ProbeReading;

  /// Fresh memory usage without touching process or load data
  fn memory_usage(&mut self) -> Option<f64> {
    self.read().memory_usage()
  }

  fn cpu_count(&self) -> usize;
}

/// Builds one probe per job
pub type ProbeFactory = Arc<dyn Fn() -> Box<dyn ResourceProbe> + Send + Sync>;

pub fn sysinfo_probe_factory() -> ProbeFactory {
  Arc::new(|| Box::new(SysinfoProbe::new()) as Box<dyn ResourceProbe>)
}

/// Host telemetry through `sysinfo`
pub struct SysinfoProbe {
  system: System,
  pid: Pid,
  cpus: usize,
}

impl SysinfoProbe {
  pub fn new() -> Self {
    let mut system = System::new();
    system.refresh_memory();
    Self {
      system,
      pid: Pid::from_u32(std::process::id()),
      cpus: num_cpus::get().max(1),
    }
  }
}

impl Default for SysinfoProbe {
  fn default() -> Self {
    Self::new()
  }
}

impl ResourceProbe for SysinfoProbe {
  fn read(&mut self) -> ProbeReading {
    self.system.refresh_memory();
    self
      .system
      .refresh_processes_specifics(ProcessesToUpdate::Some(&[self.pid]), true, ProcessRefreshKind::nothing().with_memory());

    ProbeReading {
      total_memory: self.system.total_memory(),
      available_memory: self.system.available_memory(),
      process_rss: self.system.process(self.pid).map(|p| p.memory()).unwrap_or(0),
      load_one: System::load_average().one,
    }
  }

  fn memory_usage(&mut self) -> Option<f64> {
    self.system.refresh_memory();
    ProbeReading {
      total_memory: self.system.total_memory(),
      available_memory: self.system.available_memory(),
      process_rss: 0,
      load_one: 0.0,
    }
    .memory_usage()
  }

  fn cpu_count(&self) -> usize {
    self.cpus
  }
}

#[cfg(test)]
pub use scripted::ScriptedProbe;

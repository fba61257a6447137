//! Resource check command

use anyhow::{Result, bail};
use corpusd::{
  config::Config,
  monitor::{ResourceMonitor, SysinfoProbe},
};

use crate::format::resource_report;

/// Sample the host once through the same ladder a job would use
pub fn cmd_check(config: &Config) -> Result<()> {
  let mut monitor = ResourceMonitor::new(config.monitor.clone(), Box::new(SysinfoProbe::new()));
  let Some(sample) = monitor.sample_now() else {
    bail!("Memory telemetry is unavailable on this host");
  };

  println!("Host resources (starting from batch size {}):", config.monitor.batch_default);
  println!();
  print!("{}", resource_report(&sample));
  Ok(())
}

//! CLI command implementations

mod check;
mod config;
mod ingest;

pub use check::cmd_check;
pub use config::{cmd_config_init, cmd_config_show};
pub use ingest::cmd_ingest;

//! corpusd CLI - adaptive document ingestion into Meilisearch

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corpusd::{config::Config, job::JobKind};

mod commands;
mod format;
mod logging;

use commands::{cmd_check, cmd_config_init, cmd_config_show, cmd_ingest};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "corpusd")]
#[command(about = "Index folders and archives into Meilisearch without exhausting the host")]
#[command(after_help = "\
QUICK START:
  corpusd config init             # Write a commented config file
  corpusd check                   # Show what the resource monitor sees
  corpusd ingest folder ./docs    # Index a folder
  corpusd ingest archive wiki.zim # Index an archive

ENVIRONMENT:
  MEILI_MASTER_KEY                # API key when [engine] api_key is unset
  RUST_LOG                        # Override the configured log level")]
struct Cli {
  /// Config file (default: ./corpusd.toml, then the user config)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Write logs to a rotating file instead of stderr
  #[arg(long, global = true, value_name = "FILE")]
  log_file: Option<PathBuf>,

  /// Increase log verbosity (-v debug, -vv trace)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `corpusd ingest`
#[derive(Subcommand)]
pub enum IngestCommand {
  /// Index every eligible file below a folder
  #[command(long_about = "Index every eligible file below a folder.\n\n\
    Hidden entries and OS metadata files are skipped. Re-running against the\n\
    same folder updates documents in place.")]
  Folder {
    /// Folder to index
    path: PathBuf,
    #[command(flatten)]
    output: IngestOutput,
  },
  /// Index a .zim or .zip archive
  #[command(long_about = "Index a .zim or .zip archive.\n\n\
    .zim archives are streamed through the configured extractor; .zip archives\n\
    are read entry by entry.")]
  Archive {
    /// Archive to index
    path: PathBuf,
    #[command(flatten)]
    output: IngestOutput,
  },
}

#[derive(clap::Args)]
pub struct IngestOutput {
  /// Print the final job snapshot as JSON
  #[arg(long)]
  json: bool,
  /// Progress poll interval in milliseconds
  #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
  interval_ms: u64,
}

/// Subcommands for `corpusd config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show current effective configuration
  #[command(long_about = "Show the current effective configuration.\n\n\
    Displays which config file is being used and its contents as TOML.")]
  Show,

  /// Write a commented config template
  #[command(long_about = "Write a commented config template.\n\n\
    Writes to --config when given, otherwise to the user config file.")]
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run an ingestion job in the foreground
  Ingest {
    #[command(subcommand)]
    command: IngestCommand,
  },
  /// Configuration management
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
  /// Sample host resources once and show the resulting batch controls
  Check,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  // `config init` must work even when the current config is broken
  let config = match &cli.command {
    Commands::Config {
      command: ConfigCommand::Init { .. },
    } => Config::default(),
    _ => Config::load(cli.config.as_deref()).context("Failed to load configuration")?,
  };

  let _guard = init_logging(&config.daemon, cli.verbose, cli.log_file.as_deref());

  match cli.command {
    Commands::Ingest { command } => {
      let (kind, path, output) = match command {
        IngestCommand::Folder { path, output } => (JobKind::FolderSync, path, output),
        IngestCommand::Archive { path, output } => (JobKind::ArchiveIndex, path, output),
      };
      cmd_ingest(config, kind, &path, output.json, Duration::from_millis(output.interval_ms)).await
    }
    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(&config, cli.config.as_deref()),
      ConfigCommand::Init { force } => cmd_config_init(cli.config.as_deref(), force),
    },
    Commands::Check => cmd_check(&config),
  }
}

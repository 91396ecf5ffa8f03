//! Spindex CLI - Command-line interface for spindex
//!
//! Provides commands for:
//! - Running full and incremental syncs of a SharePoint Online tenant
//! - Validating credentials, tenant name and configured sites
//! - Viewing and editing the configuration file

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use spindex_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{config::ConfigCommand, sync::SyncCommand, validate::ValidateCommand};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "spindex", version, about = "SharePoint Online indexer")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Walk the tenant into an index or a JSON-lines file
    Sync(SyncCommand),
    /// Check credentials, tenant name and configured sites
    Validate(ValidateCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Log filter for the `-v` count; without `-v` the configured level applies
fn log_filter(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    // Setup tracing
    let configured = Config::load_or_default(&config_path).logging.level;
    let filter = log_filter(cli.verbose, &configured);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(&config_path, format).await,
        Commands::Validate(cmd) => cmd.execute(&config_path, format).await,
        Commands::Config(cmd) => cmd.execute(&config_path, format).await,
    }
}

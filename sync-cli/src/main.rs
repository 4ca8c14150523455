//! # sync-cli
//!
//! Developer tool for offgrid-sync.
//!
//! ## Commands
//!
//! - `derive`: Derive have/want/wanted/missing counts from a scenario file
//! - `table`: Print the sync-enabled state transition table
//! - `check-config`: Validate a sync engine config file
//!
//! ## Example
//!
//! ```bash
//! # Counts for a hand-written scenario
//! sync-cli derive scenario.toml
//!
//! # Which state each combination of inputs leads to
//! sync-cli table
//!
//! # Validate before deploying
//! sync-cli check-config sync.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry, EnvFilter};

mod commands;
mod scenario;

use commands::{check_config, derive, table};

/// Developer tool for offgrid-sync.
#[derive(Parser, Debug)]
#[command(name = "sync-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive replication counts from a scenario file
    Derive {
        /// Scenario file (TOML)
        scenario: PathBuf,

        /// Print the raw derived state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the sync-enabled state transition table
    Table,

    /// Validate a sync engine config file
    CheckConfig {
        /// Config file (TOML)
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Derive { scenario, json } => {
            derive::run(&scenario, json)?;
        }
        Commands::Table => {
            table::run();
        }
        Commands::CheckConfig { config } => {
            check_config::run(&config)?;
        }
    }

    Ok(())
}

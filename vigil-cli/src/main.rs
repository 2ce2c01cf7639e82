//! # vigil
//!
//! CLI driver for the vigil broker verification scenarios.
//!
//! ## Commands
//!
//! - `list`: Show every registered scenario
//! - `run`: Drive one scenario against a broker for a fixed duration
//! - `wipe`: Sweep a broker clean of streams, buckets, and object stores
//!
//! ## Example
//!
//! ```bash
//! # See what can be run
//! vigil list
//!
//! # One minute of publish/fetch/ack verification against the mock
//! vigil run --scenario durable-sequence --duration 60 --mock
//!
//! # CAS contention with tunables from a file, sweeping before and after
//! vigil run --scenario cas-contention --config vigil.toml \
//!     --wipe-before --wipe-after --mock
//!
//! # Clean up a broker by hand
//! vigil wipe --mock
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::run::RunParams;

/// Scenario driver for a replicated message-log and key-value broker.
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Target the in-process mock broker instead of a real deployment
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show every registered scenario
    List,

    /// Drive one scenario against a broker for a fixed duration
    Run {
        /// Scenario name, as printed by `vigil list`
        #[arg(long, short)]
        scenario: String,

        /// Experiment duration in seconds
        #[arg(long, short, default_value = "60")]
        duration: u64,

        /// Broker address
        #[arg(long, default_value = "localhost:4222")]
        server: String,

        /// TOML file with scenario tunables
        #[arg(long)]
        config: Option<PathBuf>,

        /// Sweep the broker clean before the run
        #[arg(long)]
        wipe_before: bool,

        /// Sweep the broker clean after the run
        #[arg(long)]
        wipe_after: bool,

        /// Seed for the scenario's random draws
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Sweep a broker clean of streams, buckets, and object stores
    Wipe {
        /// Broker address
        #[arg(long, default_value = "localhost:4222")]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            commands::list::run()?;
        }
        Commands::Run {
            scenario,
            duration,
            server,
            config,
            wipe_before,
            wipe_after,
            seed,
        } => {
            commands::run::run(RunParams {
                scenario,
                duration_secs: duration,
                server,
                config,
                wipe_before,
                wipe_after,
                seed,
                mock: cli.mock,
            })
            .await?;
        }
        Commands::Wipe { server } => {
            commands::wipe::run(&server, cli.mock).await?;
        }
    }

    Ok(())
}

//! Drive one scenario against a broker.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use vigil_harness::{run_scenario, RunOptions, ScenarioConfig};

/// Everything the run command collects from the command line.
#[derive(Debug)]
pub struct RunParams {
    /// Registered scenario name.
    pub scenario: String,
    /// Experiment duration in seconds.
    pub duration_secs: u64,
    /// Broker address.
    pub server: String,
    /// Optional TOML file with scenario tunables.
    pub config: Option<PathBuf>,
    /// Sweep the broker before the run.
    pub wipe_before: bool,
    /// Sweep the broker after the run.
    pub wipe_after: bool,
    /// Seed for the scenario's random draws.
    pub seed: Option<u64>,
    /// Target the in-process mock broker.
    pub mock: bool,
}

/// Run the run command.
pub async fn run(params: RunParams) -> Result<()> {
    let config = match &params.config {
        Some(path) => ScenarioConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ScenarioConfig::default(),
    };

    let broker = super::select_broker(params.mock)?;

    let options = RunOptions {
        scenario: params.scenario,
        duration: Duration::from_secs(params.duration_secs),
        address: params.server,
        wipe_before: params.wipe_before,
        wipe_after: params.wipe_after,
        seed: params.seed,
        config,
    };

    let report = run_scenario(broker, options).await?;
    println!("{}", report.render());

    Ok(())
}

//! Scenario execution with its surrounding lifecycle.
//!
//! [`run_scenario`] resolves a scenario by name, optionally sweeps the
//! broker clean before the run, drives the scenario to its horizon, and
//! optionally sweeps again afterwards. The closing sweep runs even when
//! the scenario failed; its own failure is logged, never allowed to mask
//! the scenario's outcome.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::ScenarioConfig;
use crate::context::ScenarioContext;
use crate::error::ScenarioError;
use crate::registry::Registry;
use crate::report::ScenarioReport;
use crate::retry::Attempt;
use crate::wipe::{wipe, WipeReport};
use vigil_client::Broker;

/// Everything needed to run one scenario.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Registered name of the scenario to run.
    pub scenario: String,
    /// Experiment horizon; the scenario winds down when it passes.
    pub duration: Duration,
    /// Broker address handed to every session.
    pub address: String,
    /// Sweep the broker clean before the run.
    pub wipe_before: bool,
    /// Sweep the broker clean after the run.
    pub wipe_after: bool,
    /// Seed for the scenario's random draws; `None` draws from entropy.
    pub seed: Option<u64>,
    /// Scenario tunables.
    pub config: ScenarioConfig,
}

async fn wipe_with(
    broker: &Arc<dyn Broker>,
    ctx: &ScenarioContext,
) -> Result<Option<WipeReport>, ScenarioError> {
    let options = ctx.connect_options("vigil-wipe");
    let session = match ctx.retry("connect", || broker.connect(&options)).await? {
        Attempt::Done(session) => session,
        Attempt::Expired => return Ok(None),
    };
    Ok(Some(wipe(session.as_ref()).await?))
}

/// Run the named scenario against `broker`.
///
/// # Errors
///
/// Returns [`ScenarioError::UnknownScenario`] for an unregistered name,
/// and otherwise whatever the scenario or the opening sweep reports.
pub async fn run_scenario(
    broker: Arc<dyn Broker>,
    options: RunOptions,
) -> Result<ScenarioReport, ScenarioError> {
    let registry = Registry::builtin();
    let Some(scenario) = registry.get(&options.scenario) else {
        return Err(ScenarioError::UnknownScenario(options.scenario));
    };

    let ctx = Arc::new(ScenarioContext::new(
        options.config,
        options.address,
        options.duration,
        options.seed,
    ));

    if options.wipe_before {
        match wipe_with(&broker, &ctx).await? {
            Some(report) => {
                info!(
                    removed = report.removed(),
                    failures = report.failures,
                    "broker swept before run"
                );
            }
            None => warn!("horizon passed before the opening sweep"),
        }
    }

    info!(
        scenario = scenario.name(),
        run_id = %ctx.run_id(),
        duration_secs = options.duration.as_secs(),
        "scenario starting"
    );

    let result = scenario.run(Arc::clone(&broker), Arc::clone(&ctx)).await;

    if options.wipe_after {
        match wipe_with(&broker, &ctx).await {
            Ok(Some(report)) => info!(removed = report.removed(), "broker swept after run"),
            Ok(None) => {}
            Err(sweep_error) => warn!(%sweep_error, "closing sweep failed"),
        }
    }

    match &result {
        Ok(report) => info!(
            scenario = report.scenario,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "scenario passed"
        ),
        Err(scenario_error) => error!(%scenario_error, "scenario failed"),
    }
    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_client::{MockBroker, Session, StreamConfig};

    fn options(scenario: &str) -> RunOptions {
        RunOptions {
            scenario: scenario.to_string(),
            duration: Duration::from_millis(50),
            address: "mock://local".to_string(),
            wipe_before: false,
            wipe_after: false,
            seed: Some(1),
            config: ScenarioConfig::default(),
        }
    }

    #[tokio::test]
    async fn runs_a_scenario_end_to_end() {
        let broker = MockBroker::new();
        let session = broker.session();

        let report = run_scenario(Arc::new(broker), options("durable-sequence"))
            .await
            .unwrap();

        assert_eq!(report.scenario, "durable-sequence");
        // Without sweeps the probe stream stays behind.
        let streams = session.list_streams().await.unwrap();
        assert_eq!(streams, vec!["vigil-stream"]);
    }

    #[tokio::test]
    async fn sweeps_around_the_run_when_asked() {
        let broker = MockBroker::new();
        let session = broker.session();
        session
            .create_stream(&StreamConfig::new("stale-junk"))
            .await
            .unwrap();

        let mut run = options("durable-sequence");
        run.wipe_before = true;
        run.wipe_after = true;

        run_scenario(Arc::new(broker), run).await.unwrap();

        assert!(session.list_streams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_scenario_is_an_error() {
        let broker = MockBroker::new();

        let err = run_scenario(Arc::new(broker), options("no-such-thing"))
            .await
            .unwrap_err();

        assert!(matches!(err, ScenarioError::UnknownScenario(name) if name == "no-such-thing"));
    }
}

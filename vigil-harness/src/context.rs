//! Shared per-run state handed to every scenario.
//!
//! A [`ScenarioContext`] fixes the experiment horizon, carries the loaded
//! configuration, and stamps the run with an id that shows up in logs and
//! reports. Scenarios treat it as read-only and share it behind an `Arc`.

use std::future::Future;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ScenarioConfig;
use crate::error::ScenarioError;
use crate::retry::{retry, Attempt, RetryPolicy};
use vigil_client::{BrokerError, ConnectOptions};

/// Shared state for one scenario run.
#[derive(Debug)]
pub struct ScenarioContext {
    run_id: Uuid,
    config: ScenarioConfig,
    address: String,
    started: Instant,
    deadline: Instant,
    seed: Option<u64>,
}

impl ScenarioContext {
    /// Create a context whose experiment horizon is `duration` from now.
    pub fn new(
        config: ScenarioConfig,
        address: String,
        duration: Duration,
        seed: Option<u64>,
    ) -> Self {
        let started = Instant::now();
        Self {
            run_id: Uuid::new_v4(),
            config,
            address,
            started,
            deadline: started + duration,
            seed,
        }
    }

    /// Unique id of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Loaded configuration.
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Instant at which the experiment ends.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the experiment horizon has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left until the experiment ends, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Time elapsed since the run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Connection options for a session labelled `client_name`.
    pub fn connect_options(&self, client_name: &str) -> ConnectOptions {
        ConnectOptions::new(&self.address).with_client_name(client_name)
    }

    /// Random source for this run.
    ///
    /// Seeded runs replay the same operation order; unseeded runs draw
    /// from entropy.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Retry policy from the loaded configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry.policy()
    }

    /// Retry `attempt` under the configured per-operation budget.
    ///
    /// See [`retry`] for the full semantics. The experiment horizon of
    /// this context caps every call.
    pub async fn retry<T, F, Fut>(
        &self,
        operation: &'static str,
        attempt: F,
    ) -> Result<Attempt<T>, ScenarioError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        retry(operation, self.retry_policy(), self.deadline, attempt).await
    }

    /// Retry `attempt` under an explicit budget instead of the configured one.
    pub async fn retry_within<T, F, Fut>(
        &self,
        operation: &'static str,
        budget: Duration,
        attempt: F,
    ) -> Result<Attempt<T>, ScenarioError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let policy = RetryPolicy {
            budget,
            ..self.retry_policy()
        };
        retry(operation, policy, self.deadline, attempt).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn context(duration: Duration) -> ScenarioContext {
        ScenarioContext::new(
            ScenarioConfig::default(),
            "mock://local".to_string(),
            duration,
            Some(7),
        )
    }

    #[tokio::test]
    async fn fresh_context_has_time_remaining() {
        let ctx = context(Duration::from_secs(60));
        assert!(!ctx.expired());
        assert!(ctx.remaining() > Duration::from_secs(59));
    }

    #[tokio::test]
    async fn context_expires_at_the_horizon() {
        let ctx = context(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(ctx.expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn seeded_rng_replays_the_same_draws() {
        let ctx = context(Duration::from_secs(1));
        let mut first_rng = ctx.rng();
        let mut second_rng = ctx.rng();
        let first: Vec<u64> = (0..4).map(|_| first_rng.gen_range(0..100)).collect();
        let second: Vec<u64> = (0..4).map(|_| second_rng.gen_range(0..100)).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn connect_options_carry_address_and_name() {
        let ctx = context(Duration::from_secs(1));
        let options = ctx.connect_options("vigil-probe");
        assert_eq!(options.address, "mock://local");
        assert_eq!(options.client_name, "vigil-probe");
    }

    #[tokio::test]
    async fn retry_uses_the_configured_budget() {
        let ctx = context(Duration::from_secs(60));
        let result = ctx.retry("noop", || async { Ok::<_, BrokerError>(42) }).await;
        assert!(matches!(result, Ok(Attempt::Done(42))));
    }
}

//! Named scenarios and the table that holds them.
//!
//! Each verification workload implements [`Scenario`] and registers under
//! a stable name. The CLI resolves names through [`Registry::get`] and
//! lists them with [`Registry::iter`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ScenarioContext;
use crate::error::ScenarioError;
use crate::report::ScenarioReport;
use crate::scenarios::{CasContention, DurableSequence, KvCells, QueueGroup, StreamChurn};
use vigil_client::Broker;

/// One runnable verification workload.
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Stable name used to select the scenario.
    fn name(&self) -> &'static str;

    /// One-line description for listings.
    fn summary(&self) -> &'static str;

    /// Drive the workload until the context expires or an invariant breaks.
    async fn run(
        &self,
        broker: Arc<dyn Broker>,
        ctx: Arc<ScenarioContext>,
    ) -> Result<ScenarioReport, ScenarioError>;
}

/// Table of registered scenarios.
pub struct Registry {
    scenarios: Vec<Box<dyn Scenario>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            scenarios: Vec::new(),
        }
    }

    /// The registry with every built-in scenario.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DurableSequence));
        registry.register(Box::new(CasContention));
        registry.register(Box::new(QueueGroup));
        registry.register(Box::new(StreamChurn));
        registry.register(Box::new(KvCells));
        registry
    }

    /// Add a scenario to the table.
    pub fn register(&mut self, scenario: Box<dyn Scenario>) {
        self.scenarios.push(scenario);
    }

    /// Look up a scenario by name.
    pub fn get(&self, name: &str) -> Option<&dyn Scenario> {
        self.scenarios
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    /// Iterate over registered scenarios in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Scenario> {
        self.scenarios.iter().map(|s| s.as_ref())
    }

    /// Names of every registered scenario.
    pub fn names(&self) -> Vec<&'static str> {
        self.scenarios.iter().map(|s| s.name()).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_lists_every_scenario() {
        let registry = Registry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "durable-sequence",
                "cas-contention",
                "queue-group",
                "stream-churn",
                "kv-cells",
            ]
        );
    }

    #[test]
    fn lookup_by_name() {
        let registry = Registry::builtin();
        let scenario = registry.get("cas-contention").unwrap();
        assert_eq!(scenario.name(), "cas-contention");
        assert!(!scenario.summary().is_empty());
    }

    #[test]
    fn unknown_name_is_none() {
        let registry = Registry::builtin();
        assert!(registry.get("no-such-scenario").is_none());
    }

    #[test]
    fn every_summary_is_set() {
        for scenario in Registry::builtin().iter() {
            assert!(!scenario.summary().is_empty(), "{}", scenario.name());
        }
    }
}

//! # vigil-harness
//!
//! Correctness and load scenarios for a replicated message-log and
//! key-value broker.
//!
//! Each scenario drives a broker through one workload while checking the
//! answers it gives back against a local oracle. A healthy broker makes
//! every scenario run quietly to its horizon; a broker that loses,
//! duplicates, or reorders state trips an invariant and the run fails
//! with the expected and observed values side by side.
//!
//! ## Features
//!
//! - **Bounded retries**: every broker call gets a per-operation budget
//!   inside an experiment-wide horizon
//! - **Five workloads**: durable sequences, CAS contention, queue-group
//!   fan-out, stream churn, and cell rewrites
//! - **Broker abstraction**: runs against anything implementing the
//!   `vigil-client` session contract, including its in-memory mock
//! - **Clean-slate lifecycle**: optional broker sweeps before and after
//!   every run
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use vigil_client::MockBroker;
//! use vigil_harness::{run_scenario, RunOptions, ScenarioConfig};
//!
//! let options = RunOptions {
//!     scenario: "durable-sequence".to_string(),
//!     duration: Duration::from_secs(60),
//!     address: "localhost:4222".to_string(),
//!     wipe_before: true,
//!     wipe_after: true,
//!     seed: None,
//!     config: ScenarioConfig::default(),
//! };
//!
//! let report = run_scenario(Arc::new(MockBroker::new()), options).await?;
//! println!("{}", report.render());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scenarios;
pub mod wipe;

pub use config::{ConfigError, ScenarioConfig};
pub use context::ScenarioContext;
pub use error::{InvariantViolation, ScenarioError};
pub use registry::{Registry, Scenario};
pub use report::{ReportDetail, ScenarioReport, WorkerStats};
pub use retry::{retry, Attempt, RetryPolicy};
pub use runner::{run_scenario, RunOptions};
pub use wipe::{wipe, WipeReport};

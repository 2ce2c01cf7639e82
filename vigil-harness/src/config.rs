//! Configuration loading for scenario drivers.
//!
//! Tunables are loaded from a TOML file (default: `vigil.toml`); every
//! section and field has a default, so a missing or partial file runs
//! the stock scenarios. Defaults mirror the workloads the harness was
//! originally tuned against: 50 writers racing a counter to 10 000, ten
//! group subscribers, a stream catalog churning between 1 and 10 entries.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Root configuration for scenario drivers.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScenarioConfig {
    /// Retry pacing and budgets.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Names and replication of the probe stream and its consumer.
    #[serde(default)]
    pub target: TargetConfig,
    /// Fetch waits and the per-message consume budget.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Counter contention scenario.
    #[serde(default)]
    pub cas: CasConfig,
    /// Delivery-group scenario.
    #[serde(default)]
    pub group: GroupConfig,
    /// Stream churn scenario.
    #[serde(default)]
    pub churn: ChurnConfig,
    /// Key-value cell scenario.
    #[serde(default)]
    pub cells: CellsConfig,
    /// Progress reporting.
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Retry pacing and budgets.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Budget for one retried operation in seconds (default: 30).
    #[serde(default = "default_op_budget_secs")]
    pub op_budget_secs: u64,
    /// Pause between attempts in milliseconds (default: 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

/// Names and replication of the probe stream and its consumer.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Stream the verifiers publish into (default: vigil-stream).
    #[serde(default = "default_stream_name")]
    pub stream: String,
    /// Durable consumer for the sequence verifier (default: vigil-monitor).
    #[serde(default = "default_consumer_name")]
    pub consumer: String,
    /// Replication factor for everything the harness creates (default: 3).
    #[serde(default = "default_replicas")]
    pub replicas: usize,
}

/// Fetch waits and the per-message consume budget.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Bounded wait of a single fetch in seconds (default: 1).
    #[serde(default = "default_fetch_wait_secs")]
    pub wait_secs: u64,
    /// Budget for consuming one expected message in seconds (default: 30).
    #[serde(default = "default_consume_budget_secs")]
    pub consume_budget_secs: u64,
}

/// Counter contention scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct CasConfig {
    /// Bucket holding the contended counter (default: vigil-counter).
    #[serde(default = "default_cas_bucket")]
    pub bucket: String,
    /// Key holding the counter (default: counter).
    #[serde(default = "default_cas_key")]
    pub key: String,
    /// Number of concurrent writers (default: 50).
    #[serde(default = "default_cas_workers")]
    pub workers: u32,
    /// Value at which writers stop (default: 10000).
    #[serde(default = "default_cas_ceiling")]
    pub ceiling: u64,
}

/// Delivery-group scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    /// Number of competing subscribers (default: 10).
    #[serde(default = "default_group_subscribers")]
    pub subscribers: u32,
    /// Durable consumer shared by the group (default: vigil-workers).
    #[serde(default = "default_group_consumer")]
    pub consumer: String,
}

/// Stream churn scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct ChurnConfig {
    /// Prefix for synthesized stream names (default: vigil-churn).
    #[serde(default = "default_churn_prefix")]
    pub prefix: String,
    /// Create is forced at or below this many streams (default: 1).
    #[serde(default = "default_churn_min")]
    pub min_streams: usize,
    /// Delete is forced at or above this many streams (default: 10).
    #[serde(default = "default_churn_max")]
    pub max_streams: usize,
}

/// Key-value cell scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct CellsConfig {
    /// Bucket holding the cells (default: vigil-cells).
    #[serde(default = "default_cells_bucket")]
    pub bucket: String,
    /// Number of keys written round-robin (default: 3).
    #[serde(default = "default_cells_keys")]
    pub keys: usize,
    /// Size of the opaque fill in bytes (default: 512).
    #[serde(default = "default_cells_value_size")]
    pub value_size: usize,
}

/// Progress reporting.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    /// Seconds between progress log lines (default: 3).
    #[serde(default = "default_progress_interval")]
    pub interval_secs: u64,
}

// Default value functions
fn default_op_budget_secs() -> u64 {
    30
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_stream_name() -> String {
    "vigil-stream".to_string()
}

fn default_consumer_name() -> String {
    "vigil-monitor".to_string()
}

fn default_replicas() -> usize {
    3
}

fn default_fetch_wait_secs() -> u64 {
    1
}

fn default_consume_budget_secs() -> u64 {
    30
}

fn default_cas_bucket() -> String {
    "vigil-counter".to_string()
}

fn default_cas_key() -> String {
    "counter".to_string()
}

fn default_cas_workers() -> u32 {
    50
}

fn default_cas_ceiling() -> u64 {
    10_000
}

fn default_group_subscribers() -> u32 {
    10
}

fn default_group_consumer() -> String {
    "vigil-workers".to_string()
}

fn default_churn_prefix() -> String {
    "vigil-churn".to_string()
}

fn default_churn_min() -> usize {
    1
}

fn default_churn_max() -> usize {
    10
}

fn default_cells_bucket() -> String {
    "vigil-cells".to_string()
}

fn default_cells_keys() -> usize {
    3
}

fn default_cells_value_size() -> usize {
    512
}

fn default_progress_interval() -> u64 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            op_budget_secs: default_op_budget_secs(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            stream: default_stream_name(),
            consumer: default_consumer_name(),
            replicas: default_replicas(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            wait_secs: default_fetch_wait_secs(),
            consume_budget_secs: default_consume_budget_secs(),
        }
    }
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            bucket: default_cas_bucket(),
            key: default_cas_key(),
            workers: default_cas_workers(),
            ceiling: default_cas_ceiling(),
        }
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            subscribers: default_group_subscribers(),
            consumer: default_group_consumer(),
        }
    }
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            prefix: default_churn_prefix(),
            min_streams: default_churn_min(),
            max_streams: default_churn_max(),
        }
    }
}

impl Default for CellsConfig {
    fn default() -> Self {
        Self {
            bucket: default_cells_bucket(),
            keys: default_cells_keys(),
            value_size: default_cells_value_size(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_progress_interval(),
        }
    }
}

impl RetryConfig {
    /// The section as a [`RetryPolicy`].
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            budget: Duration::from_secs(self.op_budget_secs),
            delay: Duration::from_millis(self.delay_ms),
        }
    }
}

impl FetchConfig {
    /// Bounded wait of a single fetch.
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    /// Budget for consuming one expected message.
    pub fn consume_budget(&self) -> Duration {
        Duration::from_secs(self.consume_budget_secs)
    }
}

impl ProgressConfig {
    /// Interval between progress log lines.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ScenarioConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_matches_stock_workloads() {
        let config = ScenarioConfig::default();
        assert_eq!(config.retry.op_budget_secs, 30);
        assert_eq!(config.retry.delay_ms, 1000);
        assert_eq!(config.target.replicas, 3);
        assert_eq!(config.cas.workers, 50);
        assert_eq!(config.cas.ceiling, 10_000);
        assert_eq!(config.group.subscribers, 10);
        assert_eq!(config.churn.min_streams, 1);
        assert_eq!(config.churn.max_streams, 10);
        assert_eq!(config.cells.keys, 3);
        assert_eq!(config.cells.value_size, 512);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[retry]
op_budget_secs = 5
delay_ms = 50

[cas]
workers = 8
ceiling = 100

[churn]
prefix = "probe"
max_streams = 4
"#;

        let config: ScenarioConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.retry.op_budget_secs, 5);
        assert_eq!(config.cas.workers, 8);
        assert_eq!(config.cas.ceiling, 100);
        assert_eq!(config.churn.prefix, "probe");
        assert_eq!(config.churn.max_streams, 4);
        // Untouched sections keep their defaults
        assert_eq!(config.group.subscribers, 10);
        assert_eq!(config.target.stream, "vigil-stream");
    }

    #[test]
    fn empty_file_uses_all_defaults() {
        let config: ScenarioConfig = toml::from_str("").unwrap();
        assert_eq!(config.cas.ceiling, 10_000);
        assert_eq!(config.fetch.wait_secs, 1);
    }

    #[test]
    fn from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cells]\nkeys = 7").unwrap();

        let config = ScenarioConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cells.keys, 7);
        assert_eq!(config.cells.value_size, 512);
    }

    #[test]
    fn from_file_missing_path_is_read_error() {
        let result = ScenarioConfig::from_file(std::path::Path::new("/nonexistent/vigil.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn retry_section_converts_to_policy() {
        let config = ScenarioConfig::default();
        let policy = config.retry.policy();
        assert_eq!(policy.budget, Duration::from_secs(30));
        assert_eq!(policy.delay, Duration::from_millis(1000));
    }
}

//! Error types for scenario execution.
//!
//! Three classes matter to callers: transient broker errors never reach
//! this module (retry wrappers absorb them), a [`ScenarioError::Timeout`]
//! means an operation budget ran out, and an [`InvariantViolation`] means
//! the service under test broke a guarantee. Violations are never retried.

use std::time::Duration;
use thiserror::Error;

use vigil_client::BrokerError;
use vigil_types::{PayloadError, Revision, SequencePair, WorkerId};

/// A guarantee the service under test failed to honor.
///
/// Every variant carries the expected and observed values so a failure
/// line is actionable without re-running the scenario.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// A consumed payload carried the wrong round stamp.
    #[error("round mismatch: expected {expected}, got {actual}")]
    RoundMismatch {
        /// Round the driver published.
        expected: u64,
        /// Round found in the delivered payload.
        actual: u64,
    },

    /// A delivery's sequence pair did not advance by exactly one.
    #[error("sequence violation: expected {expected}, got {actual}")]
    SequenceViolation {
        /// Pair the consumer should have reported next.
        expected: SequencePair,
        /// Pair it actually reported.
        actual: SequencePair,
    },

    /// A delivery-group member consumed a message with a stale stamp.
    #[error("delivery mismatch from {subscriber}: expected {expected}, got {actual}")]
    DeliveryMismatch {
        /// Subscriber that reported the message.
        subscriber: WorkerId,
        /// Stamp of the message just published.
        expected: u64,
        /// Stamp the subscriber consumed.
        actual: u64,
    },

    /// The counter moved by a different amount than the successful updates.
    #[error("counter accounting mismatch: counter advanced by {advanced}, successful updates {updates}")]
    CounterMismatch {
        /// Final value minus initial value.
        advanced: u64,
        /// Conditional updates the workers saw succeed.
        updates: u64,
    },

    /// The broker's stream catalog drifted from the driver's oracle.
    #[error("stream set divergence: missing {missing:?}, unexpected {unexpected:?}")]
    StreamSetDivergence {
        /// Streams the driver created that the broker no longer lists.
        missing: Vec<String>,
        /// Streams the broker lists that the driver never created.
        unexpected: Vec<String>,
    },

    /// A key's revision differs from the one recorded at the last write.
    #[error("revision mismatch on {key}: expected {expected}, got {actual}")]
    RevisionMismatch {
        /// The drifted key.
        key: String,
        /// Revision recorded after the driver's last write.
        expected: Revision,
        /// Revision the broker reported.
        actual: Revision,
    },

    /// A successful conditional update returned a non-advancing revision.
    #[error("revision did not advance on {key}: previous {previous}, returned {returned}")]
    RevisionRegression {
        /// The affected key.
        key: String,
        /// Revision the update was conditioned on.
        previous: Revision,
        /// Revision the broker returned.
        returned: Revision,
    },

    /// A stored value differs from the last value the driver wrote.
    #[error(
        "value mismatch on {key}: last write round {expected_round} ({expected_len} bytes), \
         read round {actual_round} ({actual_len} bytes)"
    )]
    ValueMismatch {
        /// The drifted key.
        key: String,
        /// Round stamp of the driver's last write.
        expected_round: u64,
        /// Byte length of the driver's last write.
        expected_len: usize,
        /// Round stamp found in the bucket.
        actual_round: u64,
        /// Byte length found in the bucket.
        actual_len: usize,
    },

    /// A revision conflict where the driver is the only writer.
    #[error("conflict where none expected on {key}: conditioned on {expected}, broker holds {current}")]
    UnexpectedConflict {
        /// The contended key.
        key: String,
        /// Revision the driver conditioned on.
        expected: Revision,
        /// Revision the broker actually holds.
        current: Revision,
    },
}

/// Errors that end a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// An operation budget ran out while absorbing transient failures.
    #[error("{operation} timed out after {budget:?}; last error: {last_error}")]
    Timeout {
        /// Label of the operation that gave up.
        operation: &'static str,
        /// Budget the operation was given.
        budget: Duration,
        /// The transient error observed on the final attempt.
        #[source]
        last_error: BrokerError,
    },

    /// The service under test violated an advertised guarantee.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// A broker error that retry may not absorb.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A payload failed to encode or decode.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// A scenario was asked to run with unusable settings.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No scenario registered under the requested name.
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    /// A worker task panicked or was lost.
    #[error("worker task failed: {0}")]
    WorkerPanic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_displays_expected_and_actual() {
        let violation = InvariantViolation::SequenceViolation {
            expected: SequencePair::new(5, 5),
            actual: SequencePair::new(7, 5),
        };
        assert_eq!(
            violation.to_string(),
            "sequence violation: expected (5, 5), got (7, 5)"
        );
    }

    #[test]
    fn timeout_carries_the_last_error() {
        let err = ScenarioError::Timeout {
            operation: "publish",
            budget: Duration::from_secs(30),
            last_error: BrokerError::Unavailable("leader election".into()),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("publish"));
        assert!(rendered.contains("leader election"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ScenarioError>();
        assert_send_sync::<InvariantViolation>();
    }
}

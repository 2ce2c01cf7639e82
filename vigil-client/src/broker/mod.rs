//! Broker session abstraction for vigil.
//!
//! This module defines the contract between the harness and the replicated
//! message-log + key-value service it verifies. Scenario drivers hold a
//! [`Session`] and never see what sits behind it (a real broker client
//! adapter, or [`MockBroker`] for tests and demos).
//!
//! # Design
//!
//! The contract is async and session-oriented:
//! - [`Broker::connect`] establishes an independent session
//! - stream/consumer/bucket CRUD plus listings for reconciliation
//! - `publish()` appends and returns the broker-assigned sequence
//! - `fetch_next()` delivers at most one message with its sequence pair
//! - `ack()` is explicit, synchronous, and idempotent
//! - `kv_update()` is conditional on the observed [`Revision`]
//!
//! # Example
//!
//! ```ignore
//! let session = broker.connect(&ConnectOptions::new("broker-0:4222")).await?;
//! session.create_stream(&StreamConfig::new("probe").with_replicas(3)).await?;
//! let ack = session.publish("probe", &payload).await?;
//! ```

mod mock;

pub use mock::{MockBroker, MockOp, MockSession};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use vigil_types::{Revision, SequencePair};

/// Broker errors.
///
/// [`BrokerError::is_transient`] partitions the taxonomy: transient errors
/// are absorbed by retry wrappers, everything else surfaces to the driver
/// untouched. A revision [`BrokerError::Conflict`] in particular is never
/// retried blindly; contended writers must re-read before trying again.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connection could not be established or was lost mid-request.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker did not answer within the client-side request window.
    #[error("request timed out")]
    RequestTimeout,

    /// The broker answered but cannot serve right now (leadership change,
    /// quorum loss, shutdown in progress).
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// No message became available within the fetch wait.
    #[error("no message within {0:?}")]
    NoMessage(Duration),

    /// Stream does not exist.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// Consumer does not exist on the named stream.
    #[error("consumer not found: {0}")]
    ConsumerNotFound(String),

    /// Key-value bucket does not exist.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Key does not exist in the bucket.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Stream already exists with a different configuration.
    #[error("stream already exists: {0}")]
    StreamExists(String),

    /// Key was already created by someone else.
    #[error("key already exists: {0}")]
    KeyExists(String),

    /// Conditional update lost: the key moved past the expected revision.
    #[error("revision conflict on {key}: expected {expected}, current {current}")]
    Conflict {
        /// The contended key.
        key: String,
        /// Revision the writer conditioned on.
        expected: Revision,
        /// Revision the broker actually holds.
        current: Revision,
    },
}

impl BrokerError {
    /// True for errors a bounded retry loop may absorb.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_)
                | BrokerError::RequestTimeout
                | BrokerError::Unavailable(_)
                | BrokerError::NoMessage(_)
        )
    }
}

/// Reconnection behavior for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum reconnect attempts before the session gives up.
    /// `None` reconnects forever.
    pub max_reconnects: Option<u32>,
    /// Pause between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_reconnects: None,
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Options for establishing a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Address of the broker (scheme and form are adapter-specific).
    pub address: String,
    /// Client name reported to the broker, visible in its monitoring.
    pub client_name: String,
    /// Reconnection behavior after a dropped connection.
    pub reconnect: ReconnectPolicy,
}

impl ConnectOptions {
    /// Options for the given address with unlimited reconnects.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            client_name: "vigil".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Set the client name reported to the broker.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }
}

/// Configuration for a replicated stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Stream name, unique within the broker.
    pub name: String,
    /// Replication factor.
    pub replicas: usize,
}

impl StreamConfig {
    /// Single-replica stream with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: 1,
        }
    }

    /// Set the replication factor.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }
}

/// Configuration for a durable pull consumer with explicit acks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Durable consumer name, unique within its stream.
    pub name: String,
    /// How long the broker waits for an ack before redelivering.
    ///
    /// Verification scenarios set this beyond their own runtime so an
    /// unacked message is never silently delivered twice.
    pub ack_wait: Duration,
}

impl ConsumerConfig {
    /// Consumer with the given name and a 30 second ack wait.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ack_wait: Duration::from_secs(30),
        }
    }

    /// Set the ack wait.
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }
}

/// Configuration for a replicated key-value bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    /// Bucket name, unique within the broker.
    pub name: String,
    /// Replication factor.
    pub replicas: usize,
}

impl BucketConfig {
    /// Single-replica bucket with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replicas: 1,
        }
    }

    /// Set the replication factor.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }
}

/// Broker response to a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Stream sequence assigned to the appended message.
    pub sequence: u64,
    /// True when the broker deduplicated this publish against an earlier one.
    pub duplicate: bool,
}

/// One message handed to a consumer, with everything needed to ack it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream the message came from.
    pub stream: String,
    /// Consumer that delivered it.
    pub consumer: String,
    /// Opaque payload bytes as published.
    pub payload: Vec<u8>,
    /// Stream and consumer sequence of this delivery.
    pub sequence: SequencePair,
}

/// A key-value entry as read from a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// Value bytes at this revision.
    pub value: Vec<u8>,
    /// Revision the broker holds for the key.
    pub revision: Revision,
}

/// Connection factory for a broker.
///
/// Scenario workers that must contend from independent connections each
/// call [`Broker::connect`] themselves.
#[async_trait]
pub trait Broker: Send + Sync + std::fmt::Debug {
    /// Establish a session with the broker.
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Session>, BrokerError>;
}

/// One session with the broker.
///
/// Implementations handle the underlying client mechanics (real broker
/// adapter, mock, etc). All operations are request-scoped; the session
/// itself carries no scenario state.
#[async_trait]
pub trait Session: Send + Sync {
    /// Create a stream, or succeed if it already exists with this exact
    /// configuration.
    async fn create_stream(&self, config: &StreamConfig) -> Result<(), BrokerError>;

    /// Delete a stream and everything attached to it.
    async fn delete_stream(&self, stream: &str) -> Result<(), BrokerError>;

    /// Names of all streams currently visible.
    async fn list_streams(&self) -> Result<Vec<String>, BrokerError>;

    /// Create a durable pull consumer, or re-attach if it already exists.
    async fn create_consumer(
        &self,
        stream: &str,
        config: &ConsumerConfig,
    ) -> Result<(), BrokerError>;

    /// Delete a consumer from a stream.
    async fn delete_consumer(&self, stream: &str, consumer: &str) -> Result<(), BrokerError>;

    /// Names of all consumers on a stream.
    async fn list_consumers(&self, stream: &str) -> Result<Vec<String>, BrokerError>;

    /// Append a payload to a stream.
    async fn publish(&self, stream: &str, payload: &[u8]) -> Result<PublishAck, BrokerError>;

    /// Deliver the next message for a consumer, waiting up to `wait`.
    ///
    /// Sessions fetching from the same consumer compete; each message goes
    /// to exactly one of them.
    async fn fetch_next(
        &self,
        stream: &str,
        consumer: &str,
        wait: Duration,
    ) -> Result<Delivery, BrokerError>;

    /// Acknowledge a delivery. Safe to repeat.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Create a key-value bucket, or succeed if it already exists with
    /// this exact configuration.
    async fn create_bucket(&self, config: &BucketConfig) -> Result<(), BrokerError>;

    /// Delete a bucket and all its keys.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), BrokerError>;

    /// Names of all buckets currently visible.
    async fn list_buckets(&self) -> Result<Vec<String>, BrokerError>;

    /// Create a key that must not exist yet. Returns the first revision.
    async fn kv_create(
        &self,
        bucket: &str,
        key: &str,
        value: &[u8],
    ) -> Result<Revision, BrokerError>;

    /// Read a key with its current revision.
    async fn kv_get(&self, bucket: &str, key: &str) -> Result<KvEntry, BrokerError>;

    /// Write a key only if it is still at `expected`. Returns the new
    /// revision, or [`BrokerError::Conflict`] with the revision actually
    /// held.
    async fn kv_update(
        &self,
        bucket: &str,
        key: &str,
        value: &[u8],
        expected: Revision,
    ) -> Result<Revision, BrokerError>;

    /// Names of all object stores currently visible. Used by the wipe sweep.
    async fn list_object_stores(&self) -> Result<Vec<String>, BrokerError>;

    /// Delete an object store.
    async fn delete_object_store(&self, store: &str) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_classified() {
        assert!(BrokerError::ConnectionFailed("refused".into()).is_transient());
        assert!(BrokerError::RequestTimeout.is_transient());
        assert!(BrokerError::Unavailable("leader election".into()).is_transient());
        assert!(BrokerError::NoMessage(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn definitive_errors_classified() {
        assert!(!BrokerError::StreamNotFound("s".into()).is_transient());
        assert!(!BrokerError::KeyExists("k".into()).is_transient());
        assert!(!BrokerError::Conflict {
            key: "k".into(),
            expected: Revision::new(4),
            current: Revision::new(7),
        }
        .is_transient());
    }

    #[test]
    fn conflict_display_names_both_revisions() {
        let err = BrokerError::Conflict {
            key: "counter".into(),
            expected: Revision::new(4),
            current: Revision::new(7),
        };
        assert_eq!(
            err.to_string(),
            "revision conflict on counter: expected 4, current 7"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BrokerError>();
    }
}

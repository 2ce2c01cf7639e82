//! Broker state sweep between runs.
//!
//! Scenarios assume a clean broker. [`wipe`] removes every stream (with
//! its consumers), key-value bucket, and object store it can list, so a
//! run never inherits leftovers from a previous one. Listing failures
//! abort the sweep; individual delete failures are logged and counted
//! but do not stop it.

use tracing::warn;

use crate::error::ScenarioError;
use vigil_client::{BrokerError, Session};

/// Counts of what [`wipe`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeReport {
    /// Streams deleted.
    pub streams: u64,
    /// Consumers deleted.
    pub consumers: u64,
    /// Key-value buckets deleted.
    pub buckets: u64,
    /// Object stores deleted.
    pub object_stores: u64,
    /// Deletes that failed and were skipped.
    pub failures: u64,
}

impl WipeReport {
    /// Total entities removed.
    pub fn removed(&self) -> u64 {
        self.streams + self.consumers + self.buckets + self.object_stores
    }
}

/// Remove every stream, bucket, and object store visible to `session`.
///
/// # Errors
///
/// Returns an error if any listing fails. Individual deletes that fail
/// are recorded in [`WipeReport::failures`] instead.
pub async fn wipe(session: &dyn Session) -> Result<WipeReport, ScenarioError> {
    let mut report = WipeReport::default();

    for stream in session.list_streams().await? {
        for consumer in session.list_consumers(&stream).await? {
            match session.delete_consumer(&stream, &consumer).await {
                Ok(()) => report.consumers += 1,
                Err(BrokerError::StreamNotFound(_) | BrokerError::ConsumerNotFound(_)) => {}
                Err(error) => {
                    warn!(%stream, %consumer, %error, "consumer delete failed during wipe");
                    report.failures += 1;
                }
            }
        }
        match session.delete_stream(&stream).await {
            Ok(()) => report.streams += 1,
            Err(BrokerError::StreamNotFound(_)) => {}
            Err(error) => {
                warn!(%stream, %error, "stream delete failed during wipe");
                report.failures += 1;
            }
        }
    }

    for bucket in session.list_buckets().await? {
        match session.delete_bucket(&bucket).await {
            Ok(()) => report.buckets += 1,
            Err(BrokerError::BucketNotFound(_)) => {}
            Err(error) => {
                warn!(%bucket, %error, "bucket delete failed during wipe");
                report.failures += 1;
            }
        }
    }

    for store in session.list_object_stores().await? {
        match session.delete_object_store(&store).await {
            Ok(()) => report.object_stores += 1,
            Err(error) => {
                warn!(%store, %error, "object store delete failed during wipe");
                report.failures += 1;
            }
        }
    }

    Ok(report)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_client::{
        Broker, BucketConfig, ConnectOptions, ConsumerConfig, MockBroker, MockOp, StreamConfig,
    };
    use vigil_types::Revision;

    async fn seeded_session(broker: &MockBroker) -> Box<dyn Session> {
        let session = broker
            .connect(&ConnectOptions::new("mock://local"))
            .await
            .unwrap();
        session
            .create_stream(&StreamConfig::new("events"))
            .await
            .unwrap();
        session
            .create_consumer("events", &ConsumerConfig::new("tail"))
            .await
            .unwrap();
        session
            .create_stream(&StreamConfig::new("audit"))
            .await
            .unwrap();
        session
            .create_bucket(&BucketConfig::new("state"))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn wipe_removes_streams_consumers_and_buckets() {
        let broker = MockBroker::new();
        let session = seeded_session(&broker).await;
        broker.seed_object_store("blobs");

        let report = wipe(session.as_ref()).await.unwrap();

        assert_eq!(report.streams, 2);
        assert_eq!(report.consumers, 1);
        assert_eq!(report.buckets, 1);
        assert_eq!(report.object_stores, 1);
        assert_eq!(report.failures, 0);
        assert!(session.list_streams().await.unwrap().is_empty());
        assert!(session.list_buckets().await.unwrap().is_empty());
        assert!(session.list_object_stores().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wipe_on_a_clean_broker_removes_nothing() {
        let broker = MockBroker::new();
        let session = broker
            .connect(&ConnectOptions::new("mock://local"))
            .await
            .unwrap();

        let report = wipe(session.as_ref()).await.unwrap();
        assert_eq!(report, WipeReport::default());
    }

    #[tokio::test]
    async fn failed_delete_is_counted_not_fatal() {
        let broker = MockBroker::new();
        let session = seeded_session(&broker).await;
        broker.fail_next(MockOp::DeleteBucket, 1);

        let report = wipe(session.as_ref()).await.unwrap();

        assert_eq!(report.streams, 2);
        assert_eq!(report.failures, 1);
        // The bucket survived the sweep
        assert_eq!(session.list_buckets().await.unwrap(), vec!["state"]);
    }

    #[tokio::test]
    async fn failed_listing_aborts_the_sweep() {
        let broker = MockBroker::new();
        let session = seeded_session(&broker).await;
        broker.fail_next(MockOp::ListStreams, 1);

        let result = wipe(session.as_ref()).await;
        assert!(matches!(result, Err(ScenarioError::Broker(_))));
    }

    #[tokio::test]
    async fn wipe_clears_kv_entries_with_the_bucket() {
        let broker = MockBroker::new();
        let session = seeded_session(&broker).await;
        let revision = session.kv_create("state", "cursor", b"0").await.unwrap();
        assert_eq!(revision, Revision::new(1));

        wipe(session.as_ref()).await.unwrap();

        session
            .create_bucket(&BucketConfig::new("state"))
            .await
            .unwrap();
        let err = session.kv_get("state", "cursor").await.unwrap_err();
        assert!(matches!(err, BrokerError::KeyNotFound(_)));
    }
}

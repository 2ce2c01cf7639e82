//! Fan-out through a shared consumer.
//!
//! One publisher feeds a stream while a group of subscribers, each on its
//! own session, compete over a single durable consumer. Exactly one
//! subscriber must claim each message. Subscribers ack before they
//! report, so a reported delivery is always a settled one; the publisher
//! confirms every message against the stamp it just published. A stale
//! stamp means the broker delivered something twice.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Barrier};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::context::ScenarioContext;
use crate::error::{InvariantViolation, ScenarioError};
use crate::registry::Scenario;
use crate::report::{ReportDetail, ScenarioReport};
use crate::retry::Attempt;
use vigil_client::{Broker, BrokerError, ConsumerConfig, StreamConfig};
use vigil_types::{GroupMessage, Payload, WorkerId};

/// One publisher against competing subscribers on a shared consumer.
pub struct QueueGroup;

enum SubscriberReport {
    Delivered { subscriber: WorkerId, sequence: u64 },
    Fatal { subscriber: WorkerId, error: ScenarioError },
}

impl QueueGroup {
    async fn subscriber(
        broker: Arc<dyn Broker>,
        ctx: Arc<ScenarioContext>,
        barrier: Arc<Barrier>,
        id: WorkerId,
        reports: mpsc::Sender<SubscriberReport>,
    ) {
        let config = ctx.config();
        let stream = config.target.stream.as_str();
        let consumer = config.group.consumer.as_str();
        let wait = config.fetch.wait();
        let pace = ctx.retry_policy().delay;

        let options = ctx.connect_options(&format!("vigil-group-{}", id.index()));
        // Reach the start line even when connect failed, then report; the
        // publisher and the other subscribers are waiting on the barrier.
        let connected = ctx.retry("connect", || broker.connect(&options)).await;
        barrier.wait().await;
        let session = match connected {
            Ok(Attempt::Done(session)) => session,
            Ok(Attempt::Expired) => return,
            Err(error) => {
                let _ = reports
                    .send(SubscriberReport::Fatal {
                        subscriber: id,
                        error,
                    })
                    .await;
                return;
            }
        };

        while !ctx.expired() {
            let delivery = match session.fetch_next(stream, consumer, wait).await {
                Ok(delivery) => delivery,
                Err(error) if error.is_transient() => {
                    // An empty fetch already waited its full window.
                    if !matches!(error, BrokerError::NoMessage(_)) {
                        tokio::time::sleep(pace).await;
                    }
                    continue;
                }
                Err(error) => {
                    let _ = reports
                        .send(SubscriberReport::Fatal {
                            subscriber: id,
                            error: error.into(),
                        })
                        .await;
                    return;
                }
            };

            let message = match GroupMessage::decode(&delivery.payload) {
                Ok(message) => message,
                Err(error) => {
                    let _ = reports
                        .send(SubscriberReport::Fatal {
                            subscriber: id,
                            error: error.into(),
                        })
                        .await;
                    return;
                }
            };

            // Ack first; a reported delivery must already be settled.
            match ctx.retry("ack delivery", || session.ack(&delivery)).await {
                Ok(Attempt::Done(())) => {}
                Ok(Attempt::Expired) => return,
                Err(error) => {
                    let _ = reports
                        .send(SubscriberReport::Fatal {
                            subscriber: id,
                            error,
                        })
                        .await;
                    return;
                }
            }

            let delivered = SubscriberReport::Delivered {
                subscriber: id,
                sequence: message.sequence,
            };
            if reports.send(delivered).await.is_err() {
                // Publisher is gone; the run is over.
                return;
            }
        }
    }
}

#[async_trait]
impl Scenario for QueueGroup {
    fn name(&self) -> &'static str {
        "queue-group"
    }

    fn summary(&self) -> &'static str {
        "competing subscribers on one consumer, verifying each message lands exactly once"
    }

    async fn run(
        &self,
        broker: Arc<dyn Broker>,
        ctx: Arc<ScenarioContext>,
    ) -> Result<ScenarioReport, ScenarioError> {
        let config = ctx.config();
        let subscribers = config.group.subscribers;
        if subscribers == 0 {
            return Err(ScenarioError::Config(
                "group.subscribers must be at least 1".to_string(),
            ));
        }
        let stream = config.target.stream.clone();
        let consumer = config.group.consumer.clone();
        let consume_budget = config.fetch.consume_budget();

        let empty_report = |rounds, deliveries| ScenarioReport {
            scenario: self.name(),
            run_id: ctx.run_id(),
            elapsed: ctx.elapsed(),
            detail: ReportDetail::Group { rounds, deliveries },
        };

        let options = ctx.connect_options("vigil-group-publisher");
        let control = match ctx.retry("connect", || broker.connect(&options)).await? {
            Attempt::Done(session) => session,
            Attempt::Expired => return Ok(empty_report(0, BTreeMap::new())),
        };

        let stream_config = StreamConfig::new(&stream).with_replicas(config.target.replicas);
        match ctx
            .retry("create stream", || control.create_stream(&stream_config))
            .await?
        {
            Attempt::Done(()) => {}
            Attempt::Expired => return Ok(empty_report(0, BTreeMap::new())),
        }

        let ack_wait = ctx.remaining() + Duration::from_secs(3600);
        let consumer_config = ConsumerConfig::new(&consumer).with_ack_wait(ack_wait);
        match ctx
            .retry("create consumer", || {
                control.create_consumer(&stream, &consumer_config)
            })
            .await?
        {
            Attempt::Done(()) => {}
            Attempt::Expired => return Ok(empty_report(0, BTreeMap::new())),
        }

        let (tx, mut rx) = mpsc::channel(1);
        let barrier = Arc::new(Barrier::new(subscribers as usize + 1));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut deliveries: BTreeMap<WorkerId, u64> = BTreeMap::new();
        for index in 0..subscribers {
            let id = WorkerId::new(index);
            deliveries.insert(id, 0);
            tasks.spawn(Self::subscriber(
                Arc::clone(&broker),
                Arc::clone(&ctx),
                Arc::clone(&barrier),
                id,
                tx.clone(),
            ));
        }
        drop(tx);

        barrier.wait().await;
        info!(subscribers, "delivery group racing");

        let mut rounds = 0u64;
        'rounds: while !ctx.expired() {
            let round = rounds + 1;
            let payload = GroupMessage { sequence: round }.encode()?;
            match ctx
                .retry("publish message", || control.publish(&stream, &payload))
                .await?
            {
                Attempt::Done(_) => {}
                Attempt::Expired => break,
            }

            let confirm_deadline = Instant::now() + consume_budget;
            let report = tokio::select! {
                report = rx.recv() => report,
                _ = tokio::time::sleep_until(ctx.deadline()) => break 'rounds,
                _ = tokio::time::sleep_until(confirm_deadline) => {
                    return Err(ScenarioError::Timeout {
                        operation: "confirm delivery",
                        budget: consume_budget,
                        last_error: BrokerError::NoMessage(consume_budget),
                    });
                }
            };

            match report {
                Some(SubscriberReport::Delivered {
                    subscriber,
                    sequence,
                }) => {
                    if sequence != round {
                        return Err(InvariantViolation::DeliveryMismatch {
                            subscriber,
                            expected: round,
                            actual: sequence,
                        }
                        .into());
                    }
                    *deliveries.entry(subscriber).or_insert(0) += 1;
                    rounds += 1;
                }
                Some(SubscriberReport::Fatal { subscriber, error }) => {
                    warn!(%subscriber, %error, "subscriber failed");
                    return Err(error);
                }
                None => {
                    if ctx.expired() {
                        break;
                    }
                    return Err(ScenarioError::WorkerPanic(
                        "all subscribers exited mid-run".to_string(),
                    ));
                }
            }
        }

        drop(rx);
        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| ScenarioError::WorkerPanic(e.to_string()))?;
        }

        info!(rounds, "delivery group finished");
        Ok(ScenarioReport {
            scenario: self.name(),
            run_id: ctx.run_id(),
            elapsed: ctx.elapsed(),
            detail: ReportDetail::Group { rounds, deliveries },
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use vigil_client::{MockBroker, Session};

    fn group_context(subscribers: u32, duration: Duration) -> Arc<ScenarioContext> {
        let mut config = ScenarioConfig::default();
        config.group.subscribers = subscribers;
        config.retry.op_budget_secs = 2;
        config.retry.delay_ms = 10;
        config.fetch.consume_budget_secs = 5;
        Arc::new(ScenarioContext::new(
            config,
            "mock://local".to_string(),
            duration,
            Some(11),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_message_lands_exactly_once() {
        let broker = MockBroker::new();
        let ctx = group_context(3, Duration::from_millis(300));

        let report = QueueGroup.run(Arc::new(broker), ctx).await.unwrap();

        match report.detail {
            ReportDetail::Group { rounds, deliveries } => {
                assert!(rounds >= 1);
                assert_eq!(deliveries.len(), 3);
                let total: u64 = deliveries.values().sum();
                assert_eq!(total, rounds);
            }
            other => panic!("wrong detail: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn redelivered_message_is_a_violation() {
        let broker = MockBroker::new();
        broker.duplicate_next_delivery("vigil-stream", "vigil-workers");
        let ctx = group_context(3, Duration::from_secs(5));

        let err = QueueGroup.run(Arc::new(broker), ctx).await.unwrap_err();

        match err {
            ScenarioError::Invariant(InvariantViolation::DeliveryMismatch {
                expected,
                actual,
                ..
            }) => {
                assert_eq!(actual, 1);
                assert!(expected >= 2);
            }
            other => panic!("expected delivery mismatch, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subscriber_failure_fails_the_run() {
        let broker = MockBroker::new();
        let session = broker.session();
        let ctx = group_context(2, Duration::from_secs(5));

        let broker_arc: Arc<dyn Broker> = Arc::new(broker);
        let handle = tokio::spawn({
            let broker_arc = Arc::clone(&broker_arc);
            async move { QueueGroup.run(broker_arc, ctx).await }
        });

        // Yank the consumer out from under the group mid-run.
        tokio::time::sleep(Duration::from_millis(100)).await;
        session
            .delete_consumer("vigil-stream", "vigil-workers")
            .await
            .unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(ScenarioError::Broker(BrokerError::ConsumerNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn zero_subscribers_is_a_config_error() {
        let broker = MockBroker::new();
        let ctx = group_context(0, Duration::from_secs(1));

        let err = QueueGroup.run(Arc::new(broker), ctx).await.unwrap_err();
        assert!(matches!(err, ScenarioError::Config(_)));
    }
}

//! Sequence continuity through a durable consumer.
//!
//! One session publishes a round-stamped message, fetches it back through
//! a durable explicit-ack consumer, and acknowledges it. Every delivery
//! must carry the round just published and a sequence pair exactly one
//! past the previous ack. A gap, regression, or stale round ends the run
//! with a violation.
//!
//! The consumer's ack wait is set past the experiment horizon, so a
//! message the driver fetched but has not acked yet is never redelivered
//! behind its back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::context::ScenarioContext;
use crate::error::{InvariantViolation, ScenarioError};
use crate::registry::Scenario;
use crate::report::{ReportDetail, ScenarioReport};
use crate::retry::Attempt;
use vigil_client::{Broker, ConsumerConfig, StreamConfig};
use vigil_types::{Payload, RoundMessage, SequencePair};

/// Publish/fetch/ack rounds with end-to-end sequence verification.
pub struct DurableSequence;

impl DurableSequence {
    async fn drive(
        broker: &dyn Broker,
        ctx: &ScenarioContext,
    ) -> Result<(u64, SequencePair), ScenarioError> {
        let config = ctx.config();
        let stream = config.target.stream.clone();
        let consumer = config.target.consumer.clone();
        let fetch_wait = config.fetch.wait();
        let consume_budget = config.fetch.consume_budget();
        let progress_interval = config.progress.interval();

        let options = ctx.connect_options("vigil-sequence");
        let session = match ctx.retry("connect", || broker.connect(&options)).await? {
            Attempt::Done(session) => session,
            Attempt::Expired => return Ok((0, SequencePair::zero())),
        };

        let stream_config = StreamConfig::new(&stream).with_replicas(config.target.replicas);
        match ctx
            .retry("create stream", || session.create_stream(&stream_config))
            .await?
        {
            Attempt::Done(()) => {}
            Attempt::Expired => return Ok((0, SequencePair::zero())),
        }

        // Redelivery must not fire while the run is still going.
        let ack_wait = ctx.remaining() + Duration::from_secs(3600);
        let consumer_config = ConsumerConfig::new(&consumer).with_ack_wait(ack_wait);
        match ctx
            .retry("create consumer", || {
                session.create_consumer(&stream, &consumer_config)
            })
            .await?
        {
            Attempt::Done(()) => {}
            Attempt::Expired => return Ok((0, SequencePair::zero())),
        }

        let mut rounds = 0u64;
        let mut last_acked = SequencePair::zero();
        let mut last_progress = Instant::now();

        while !ctx.expired() {
            let round = rounds + 1;
            let payload = RoundMessage { round }.encode()?;

            let ack = match ctx
                .retry("publish round", || session.publish(&stream, &payload))
                .await?
            {
                Attempt::Done(ack) => ack,
                Attempt::Expired => break,
            };
            debug!(round, sequence = ack.sequence, "round published");

            let delivery = match ctx
                .retry_within("fetch round", consume_budget, || {
                    session.fetch_next(&stream, &consumer, fetch_wait)
                })
                .await?
            {
                Attempt::Done(delivery) => delivery,
                Attempt::Expired => break,
            };

            let message = RoundMessage::decode(&delivery.payload)?;
            if message.round != round {
                return Err(InvariantViolation::RoundMismatch {
                    expected: round,
                    actual: message.round,
                }
                .into());
            }
            if !delivery.sequence.is_successor_of(&last_acked) {
                return Err(InvariantViolation::SequenceViolation {
                    expected: last_acked.next(),
                    actual: delivery.sequence,
                }
                .into());
            }

            match ctx.retry("ack round", || session.ack(&delivery)).await? {
                Attempt::Done(()) => {}
                Attempt::Expired => break,
            }

            last_acked = delivery.sequence;
            rounds += 1;

            if last_progress.elapsed() >= progress_interval {
                info!(rounds, last_acked = %last_acked, "rounds verified so far");
                last_progress = Instant::now();
            }
        }

        Ok((rounds, last_acked))
    }
}

#[async_trait]
impl Scenario for DurableSequence {
    fn name(&self) -> &'static str {
        "durable-sequence"
    }

    fn summary(&self) -> &'static str {
        "publish, fetch, and ack rounds through a durable consumer, verifying sequence continuity"
    }

    async fn run(
        &self,
        broker: Arc<dyn Broker>,
        ctx: Arc<ScenarioContext>,
    ) -> Result<ScenarioReport, ScenarioError> {
        let (rounds, last_acked) = Self::drive(broker.as_ref(), &ctx).await?;
        info!(rounds, last_acked = %last_acked, "sequence verification finished");
        Ok(ScenarioReport {
            scenario: self.name(),
            run_id: ctx.run_id(),
            elapsed: ctx.elapsed(),
            detail: ReportDetail::Sequence { rounds, last_acked },
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
    use vigil_client::{MockBroker, MockOp};

    fn quick_context(duration: Duration) -> Arc<ScenarioContext> {
        let mut config = ScenarioConfig::default();
        config.retry.op_budget_secs = 2;
        config.retry.delay_ms = 10;
        config.fetch.consume_budget_secs = 2;
        Arc::new(ScenarioContext::new(
            config,
            "mock://local".to_string(),
            duration,
            Some(1),
        ))
    }

    #[tokio::test]
    async fn verifies_rounds_on_a_healthy_broker() {
        let broker = MockBroker::new();
        let ctx = quick_context(Duration::from_millis(50));

        let report = DurableSequence
            .run(Arc::new(broker), ctx.clone())
            .await
            .unwrap();

        assert_eq!(report.scenario, "durable-sequence");
        assert_eq!(report.run_id, ctx.run_id());
        match report.detail {
            ReportDetail::Sequence { rounds, last_acked } => {
                assert!(rounds >= 1);
                assert_eq!(last_acked, SequencePair::new(rounds, rounds));
            }
            other => panic!("wrong detail: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_publish_outage_is_absorbed() {
        let broker = MockBroker::new();
        broker.fail_next(MockOp::Publish, 2);
        let ctx = quick_context(Duration::from_millis(80));

        let report = DurableSequence
            .run(Arc::new(broker), ctx)
            .await
            .unwrap();

        match report.detail {
            ReportDetail::Sequence { rounds, .. } => assert!(rounds >= 1),
            other => panic!("wrong detail: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_sequence_gap_is_a_violation() {
        let broker = MockBroker::new();
        broker.skip_next_stream_sequence("vigil-stream");
        let ctx = quick_context(Duration::from_millis(500));

        let err = DurableSequence
            .run(Arc::new(broker), ctx)
            .await
            .unwrap_err();

        match err {
            ScenarioError::Invariant(InvariantViolation::SequenceViolation {
                expected,
                actual,
            }) => {
                assert_eq!(expected, SequencePair::new(1, 1));
                assert_eq!(actual, SequencePair::new(2, 1));
            }
            other => panic!("expected sequence violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redelivered_round_is_a_violation() {
        let broker = MockBroker::new();
        broker.duplicate_next_delivery("vigil-stream", "vigil-monitor");
        let ctx = quick_context(Duration::from_millis(500));

        let err = DurableSequence
            .run(Arc::new(broker), ctx)
            .await
            .unwrap_err();

        match err {
            ScenarioError::Invariant(InvariantViolation::RoundMismatch { expected, actual }) => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("expected round mismatch, got {other:?}"),
        }
    }
}

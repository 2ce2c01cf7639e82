//! Key-value cells rewritten by their only writer.
//!
//! A single session owns a handful of cells and rewrites each one every
//! round with a fresh opaque value, conditioned on the revision it
//! recorded at the previous write. Before each rewrite the cell is read
//! back and must hold exactly the last write: same revision, same round
//! stamp, same bytes. With no other writer alive, a conflict, a stale
//! read, or a revision that fails to advance is the broker's fault, not
//! a race.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::RngCore;
use tokio::time::Instant;
use tracing::info;

use crate::context::ScenarioContext;
use crate::error::{InvariantViolation, ScenarioError};
use crate::registry::Scenario;
use crate::report::{ReportDetail, ScenarioReport};
use crate::retry::Attempt;
use vigil_client::{Broker, BrokerError, BucketConfig};
use vigil_types::{CellValue, Payload, Revision};

/// Round-robin cell rewrites with read-back verification.
pub struct KvCells;

struct Cell {
    key: String,
    revision: Revision,
    round: u64,
    data: Vec<u8>,
}

#[async_trait]
impl Scenario for KvCells {
    fn name(&self) -> &'static str {
        "kv-cells"
    }

    fn summary(&self) -> &'static str {
        "a sole writer rewrites key-value cells, verifying revisions and read-back each round"
    }

    async fn run(
        &self,
        broker: Arc<dyn Broker>,
        ctx: Arc<ScenarioContext>,
    ) -> Result<ScenarioReport, ScenarioError> {
        let config = ctx.config();
        let bucket = config.cells.bucket.clone();
        let keys = config.cells.keys;
        let value_size = config.cells.value_size;
        if keys == 0 {
            return Err(ScenarioError::Config(
                "cells.keys must be at least 1".to_string(),
            ));
        }
        let progress_interval = config.progress.interval();

        let empty_report = |rounds| ScenarioReport {
            scenario: self.name(),
            run_id: ctx.run_id(),
            elapsed: ctx.elapsed(),
            detail: ReportDetail::Cells {
                rounds,
                revisions: BTreeMap::new(),
            },
        };

        let options = ctx.connect_options("vigil-cells");
        let session = match ctx.retry("connect", || broker.connect(&options)).await? {
            Attempt::Done(session) => session,
            Attempt::Expired => return Ok(empty_report(0)),
        };

        let bucket_config = BucketConfig::new(&bucket).with_replicas(config.target.replicas);
        match ctx
            .retry("create bucket", || session.create_bucket(&bucket_config))
            .await?
        {
            Attempt::Done(()) => {}
            Attempt::Expired => return Ok(empty_report(0)),
        }

        let mut rng = ctx.rng();
        let mut cells: Vec<Cell> = Vec::with_capacity(keys);
        for index in 0..keys {
            let key = format!("cell-{index}");
            let mut data = vec![0u8; value_size];
            rng.fill_bytes(&mut data);
            let seed = CellValue { round: 0, data };
            let seed_payload = seed.encode()?;
            let cell = match ctx
                .retry("seed cell", || session.kv_create(&bucket, &key, &seed_payload))
                .await
            {
                Ok(Attempt::Done(revision)) => Cell {
                    key,
                    revision,
                    round: 0,
                    data: seed.data,
                },
                Ok(Attempt::Expired) => return Ok(empty_report(0)),
                // A previous run left the cell behind; adopt where it
                // stopped.
                Err(ScenarioError::Broker(BrokerError::KeyExists(_))) => {
                    match ctx
                        .retry("read cell", || session.kv_get(&bucket, &key))
                        .await?
                    {
                        Attempt::Done(entry) => {
                            let value = CellValue::decode(&entry.value)?;
                            Cell {
                                key,
                                revision: entry.revision,
                                round: value.round,
                                data: value.data,
                            }
                        }
                        Attempt::Expired => return Ok(empty_report(0)),
                    }
                }
                Err(error) => return Err(error),
            };
            cells.push(cell);
        }

        info!(%bucket, keys, value_size, "cell rewrites starting");

        let mut rounds = 0u64;
        let mut last_progress = Instant::now();

        'rounds: while !ctx.expired() {
            let round = rounds + 1;
            for cell in &mut cells {
                let entry = match ctx
                    .retry("read cell", || session.kv_get(&bucket, &cell.key))
                    .await?
                {
                    Attempt::Done(entry) => entry,
                    Attempt::Expired => break 'rounds,
                };
                if entry.revision != cell.revision {
                    return Err(InvariantViolation::RevisionMismatch {
                        key: cell.key.clone(),
                        expected: cell.revision,
                        actual: entry.revision,
                    }
                    .into());
                }
                let stored = CellValue::decode(&entry.value)?;
                if stored.round != cell.round || stored.data != cell.data {
                    return Err(InvariantViolation::ValueMismatch {
                        key: cell.key.clone(),
                        expected_round: cell.round,
                        expected_len: cell.data.len(),
                        actual_round: stored.round,
                        actual_len: stored.data.len(),
                    }
                    .into());
                }

                let mut data = vec![0u8; value_size];
                rng.fill_bytes(&mut data);
                let next = CellValue { round, data };
                let payload = next.encode()?;
                let returned = match ctx
                    .retry("rewrite cell", || {
                        session.kv_update(&bucket, &cell.key, &payload, cell.revision)
                    })
                    .await
                {
                    Ok(Attempt::Done(revision)) => revision,
                    Ok(Attempt::Expired) => break 'rounds,
                    Err(ScenarioError::Broker(BrokerError::Conflict {
                        expected, current, ..
                    })) => {
                        return Err(InvariantViolation::UnexpectedConflict {
                            key: cell.key.clone(),
                            expected,
                            current,
                        }
                        .into());
                    }
                    Err(error) => return Err(error),
                };
                if returned <= cell.revision {
                    return Err(InvariantViolation::RevisionRegression {
                        key: cell.key.clone(),
                        previous: cell.revision,
                        returned,
                    }
                    .into());
                }
                cell.revision = returned;
                cell.round = round;
                cell.data = next.data;
            }
            rounds = round;

            if last_progress.elapsed() >= progress_interval {
                info!(rounds, "cell rounds completed so far");
                last_progress = Instant::now();
            }
        }

        info!(rounds, "cell rewrites finished");
        Ok(ScenarioReport {
            scenario: self.name(),
            run_id: ctx.run_id(),
            elapsed: ctx.elapsed(),
            detail: ReportDetail::Cells {
                rounds,
                revisions: cells
                    .into_iter()
                    .map(|cell| (cell.key, cell.revision))
                    .collect(),
            },
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
    use std::time::Duration;
    use vigil_client::{MockBroker, Session};

    fn cells_context(keys: usize, value_size: usize, duration: Duration) -> Arc<ScenarioContext> {
        let mut config = ScenarioConfig::default();
        config.cells.keys = keys;
        config.cells.value_size = value_size;
        config.retry.op_budget_secs = 2;
        config.retry.delay_ms = 10;
        Arc::new(ScenarioContext::new(
            config,
            "mock://local".to_string(),
            duration,
            Some(9),
        ))
    }

    #[tokio::test]
    async fn rewrites_verify_cleanly_on_a_healthy_broker() {
        let broker = MockBroker::new();
        let ctx = cells_context(3, 64, Duration::from_millis(100));

        let report = KvCells.run(Arc::new(broker), ctx).await.unwrap();

        match report.detail {
            ReportDetail::Cells { rounds, revisions } => {
                assert!(rounds >= 1);
                assert_eq!(revisions.len(), 3);
                assert!(revisions.contains_key("cell-0"));
            }
            other => panic!("wrong detail: {other:?}"),
        }
    }

    #[tokio::test]
    async fn leftover_cells_are_adopted() {
        let broker = MockBroker::new();
        let session = broker.session();
        session
            .create_bucket(&BucketConfig::new("vigil-cells").with_replicas(3))
            .await
            .unwrap();
        let leftover = CellValue {
            round: 7,
            data: vec![1, 2, 3],
        };
        session
            .kv_create("vigil-cells", "cell-0", &leftover.encode().unwrap())
            .await
            .unwrap();

        let ctx = cells_context(1, 3, Duration::from_millis(100));
        let report = KvCells.run(Arc::new(broker), ctx).await.unwrap();

        match report.detail {
            ReportDetail::Cells { rounds, .. } => assert!(rounds >= 1),
            other => panic!("wrong detail: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lost_rewrite_is_caught_at_the_next_read() {
        let broker = MockBroker::new();
        broker.lose_next_kv_update("vigil-cells", "cell-0");
        let ctx = cells_context(3, 64, Duration::from_secs(5));

        let err = KvCells.run(Arc::new(broker), ctx).await.unwrap_err();

        match err {
            ScenarioError::Invariant(InvariantViolation::RevisionMismatch {
                key,
                expected,
                actual,
            }) => {
                assert_eq!(key, "cell-0");
                assert!(actual < expected);
            }
            other => panic!("expected revision mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn conflict_without_a_rival_writer_is_a_violation() {
        let broker = MockBroker::new();
        broker.conflict_next_kv_update("vigil-cells", "cell-1");
        let ctx = cells_context(3, 64, Duration::from_secs(5));

        let err = KvCells.run(Arc::new(broker), ctx).await.unwrap_err();

        match err {
            ScenarioError::Invariant(InvariantViolation::UnexpectedConflict { key, .. }) => {
                assert_eq!(key, "cell-1");
            }
            other => panic!("expected unexpected-conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_keys_is_a_config_error() {
        let broker = MockBroker::new();
        let ctx = cells_context(0, 64, Duration::from_secs(1));

        let err = KvCells.run(Arc::new(broker), ctx).await.unwrap_err();
        assert!(matches!(err, ScenarioError::Config(_)));
    }
}

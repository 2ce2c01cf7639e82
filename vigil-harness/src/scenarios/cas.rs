//! Optimistic concurrency on a shared counter.
//!
//! A pack of workers race each other climbing one key-value counter to a
//! ceiling, each through its own session: read the counter, then write
//! value+1 conditioned on the revision just read. Lost races are normal
//! and tallied; what must hold is the accounting. The counter advances by
//! exactly one per successful update, so at the end
//! `final == initial + successful updates`, whether or not the ceiling
//! was reached. An acked update the broker quietly dropped, or one it
//! applied twice, shows up as a mismatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::ScenarioContext;
use crate::error::{InvariantViolation, ScenarioError};
use crate::registry::Scenario;
use crate::report::{ReportDetail, ScenarioReport, WorkerStats};
use crate::retry::Attempt;
use vigil_client::{Broker, BrokerError, BucketConfig};
use vigil_types::{CounterValue, Payload, WorkerId};

/// Many writers racing one counter upward through conditional updates.
pub struct CasContention;

impl CasContention {
    async fn worker(
        broker: Arc<dyn Broker>,
        ctx: Arc<ScenarioContext>,
        barrier: Arc<Barrier>,
        id: WorkerId,
    ) -> Result<(WorkerId, WorkerStats), ScenarioError> {
        let config = ctx.config();
        let bucket = config.cas.bucket.as_str();
        let key = config.cas.key.as_str();
        let ceiling = config.cas.ceiling;
        let progress_interval = config.progress.interval();

        let options = ctx.connect_options(&format!("vigil-cas-{}", id.index()));
        // Reach the rendezvous whether or not connect worked, then surface
        // the error; returning first would leave the others stuck on the
        // barrier forever.
        let connected = ctx.retry("connect", || broker.connect(&options)).await;
        barrier.wait().await;
        let session = match connected? {
            Attempt::Done(session) => session,
            Attempt::Expired => return Ok((id, WorkerStats::default())),
        };

        let mut stats = WorkerStats::default();
        let owner = id.to_string();
        let mut last_tick = Instant::now();

        while !ctx.expired() {
            let entry = match ctx
                .retry("read counter", || session.kv_get(bucket, key))
                .await?
            {
                Attempt::Done(entry) => entry,
                Attempt::Expired => break,
            };
            let current = CounterValue::decode(&entry.value)?;
            if current.value >= ceiling {
                break;
            }

            let next = CounterValue {
                owner: owner.clone(),
                value: current.value + 1,
            };
            let payload = next.encode()?;
            match ctx
                .retry("update counter", || {
                    session.kv_update(bucket, key, &payload, entry.revision)
                })
                .await
            {
                Ok(Attempt::Done(_)) => stats.successes += 1,
                Ok(Attempt::Expired) => break,
                Err(ScenarioError::Broker(BrokerError::Conflict { .. })) => {
                    stats.conflicts += 1;
                }
                Err(error) => return Err(error),
            }

            if last_tick.elapsed() >= progress_interval {
                debug!(
                    %id,
                    successes = stats.successes,
                    conflicts = stats.conflicts,
                    "still contending"
                );
                last_tick = Instant::now();
            }
        }

        debug!(%id, successes = stats.successes, conflicts = stats.conflicts, "worker finished");
        Ok((id, stats))
    }

    fn empty_report(&self, ctx: &ScenarioContext) -> ScenarioReport {
        ScenarioReport {
            scenario: self.name(),
            run_id: ctx.run_id(),
            elapsed: ctx.elapsed(),
            detail: ReportDetail::Cas {
                tally: BTreeMap::new(),
                initial: 0,
                final_value: None,
                reached_ceiling: false,
            },
        }
    }
}

#[async_trait]
impl Scenario for CasContention {
    fn name(&self) -> &'static str {
        "cas-contention"
    }

    fn summary(&self) -> &'static str {
        "workers race a counter upward through conditional updates, verifying exact accounting"
    }

    async fn run(
        &self,
        broker: Arc<dyn Broker>,
        ctx: Arc<ScenarioContext>,
    ) -> Result<ScenarioReport, ScenarioError> {
        let config = ctx.config();
        let workers = config.cas.workers;
        if workers == 0 {
            return Err(ScenarioError::Config(
                "cas.workers must be at least 1".to_string(),
            ));
        }
        let bucket = config.cas.bucket.clone();
        let key = config.cas.key.clone();
        let ceiling = config.cas.ceiling;

        let options = ctx.connect_options("vigil-cas-control");
        let control = match ctx.retry("connect", || broker.connect(&options)).await? {
            Attempt::Done(session) => session,
            Attempt::Expired => return Ok(self.empty_report(&ctx)),
        };

        let bucket_config = BucketConfig::new(&bucket).with_replicas(config.target.replicas);
        match ctx
            .retry("create bucket", || control.create_bucket(&bucket_config))
            .await?
        {
            Attempt::Done(()) => {}
            Attempt::Expired => return Ok(self.empty_report(&ctx)),
        }

        // Seed at 1, or adopt whatever an earlier run left behind.
        let seed = CounterValue {
            owner: "seed".to_string(),
            value: 1,
        };
        let seed_payload = seed.encode()?;
        let initial = match ctx
            .retry("seed counter", || {
                control.kv_create(&bucket, &key, &seed_payload)
            })
            .await
        {
            Ok(Attempt::Done(_)) => seed.value,
            Ok(Attempt::Expired) => return Ok(self.empty_report(&ctx)),
            Err(ScenarioError::Broker(BrokerError::KeyExists(_))) => {
                match ctx
                    .retry("read counter", || control.kv_get(&bucket, &key))
                    .await?
                {
                    Attempt::Done(entry) => CounterValue::decode(&entry.value)?.value,
                    Attempt::Expired => return Ok(self.empty_report(&ctx)),
                }
            }
            Err(error) => return Err(error),
        };

        info!(workers, ceiling, initial, "counter contention starting");

        let barrier = Arc::new(Barrier::new(workers as usize));
        let mut tasks: JoinSet<Result<(WorkerId, WorkerStats), ScenarioError>> = JoinSet::new();
        for index in 0..workers {
            tasks.spawn(Self::worker(
                Arc::clone(&broker),
                Arc::clone(&ctx),
                Arc::clone(&barrier),
                WorkerId::new(index),
            ));
        }

        let mut tally = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (id, stats) = joined.map_err(|e| ScenarioError::WorkerPanic(e.to_string()))??;
            tally.insert(id, stats);
        }

        let updates: u64 = tally.values().map(|s| s.successes).sum();
        let conflicts: u64 = tally.values().map(|s| s.conflicts).sum();

        let final_value = match ctx
            .retry("final counter read", || control.kv_get(&bucket, &key))
            .await?
        {
            Attempt::Done(entry) => Some(CounterValue::decode(&entry.value)?.value),
            Attempt::Expired => {
                warn!("run ended before the final counter read; accounting unverified");
                None
            }
        };

        if let Some(final_value) = final_value {
            if final_value != initial + updates {
                return Err(InvariantViolation::CounterMismatch {
                    advanced: final_value.saturating_sub(initial),
                    updates,
                }
                .into());
            }
        }

        info!(initial, ?final_value, updates, conflicts, "counter contention finished");
        Ok(ScenarioReport {
            scenario: self.name(),
            run_id: ctx.run_id(),
            elapsed: ctx.elapsed(),
            detail: ReportDetail::Cas {
                tally,
                initial,
                final_value,
                reached_ceiling: final_value.is_some_and(|v| v >= ceiling),
            },
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Stream catalog churn against a local oracle.
//!
//! The driver randomly creates and deletes streams under a fixed prefix,
//! mirroring every mutation into an expected-set oracle, and periodically
//! lists the catalog to compare both directions: everything the oracle
//! holds must be listed, and nothing else may be. Bounds on the set size
//! force creates when it runs low and deletes when it runs high, so the
//! catalog keeps moving instead of drifting to an edge.
//!
//! Deletes get special retry treatment. A delete whose reply was lost may
//! still have applied, so a not-found answer after an ambiguous attempt
//! counts as success. A not-found on the very first attempt is real: the
//! oracle said the stream existed, the broker disagrees.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::ScenarioContext;
use crate::error::{InvariantViolation, ScenarioError};
use crate::registry::Scenario;
use crate::report::{ReportDetail, ScenarioReport};
use crate::retry::Attempt;
use vigil_client::{Broker, BrokerError, Session, StreamConfig};

/// Random create/delete churn with listings verified against an oracle.
pub struct StreamChurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChurnOp {
    Create,
    Delete,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy {
    Forced(ChurnOp),
    Uniform,
}

/// Next-operation policy for a catalog of `count` streams bounded by
/// `min` and `max`. At or below the floor only create keeps the churn
/// honest; at or above the cap only delete does. In between, the caller
/// draws uniformly.
fn choose_operation(count: usize, min: usize, max: usize) -> Policy {
    if count <= min {
        Policy::Forced(ChurnOp::Create)
    } else if count >= max {
        Policy::Forced(ChurnOp::Delete)
    } else {
        Policy::Uniform
    }
}

/// Delete a stream the oracle says exists, reconciling lost replies.
async fn delete_reconciled(
    session: &dyn Session,
    ctx: &ScenarioContext,
    stream: &str,
) -> Result<Attempt<()>, ScenarioError> {
    let policy = ctx.retry_policy();
    let op_deadline = Instant::now() + policy.budget;
    let mut attempted = false;
    loop {
        match session.delete_stream(stream).await {
            Ok(()) => return Ok(Attempt::Done(())),
            // An earlier attempt may have applied before its reply was
            // lost; the stream being gone now means the delete won.
            Err(BrokerError::StreamNotFound(_)) if attempted => return Ok(Attempt::Done(())),
            Err(error) if !error.is_transient() => return Err(error.into()),
            Err(error) => {
                warn!(stream, %error, "transient failure deleting stream, will retry");
                attempted = true;
                let retry_at = Instant::now() + policy.delay;
                if ctx.deadline() <= retry_at && ctx.deadline() <= op_deadline {
                    tokio::time::sleep_until(ctx.deadline()).await;
                    return Ok(Attempt::Expired);
                }
                if op_deadline <= retry_at {
                    tokio::time::sleep_until(op_deadline).await;
                    return Err(ScenarioError::Timeout {
                        operation: "delete stream",
                        budget: policy.budget,
                        last_error: error,
                    });
                }
                tokio::time::sleep_until(retry_at).await;
            }
        }
    }
}

#[async_trait]
impl Scenario for StreamChurn {
    fn name(&self) -> &'static str {
        "stream-churn"
    }

    fn summary(&self) -> &'static str {
        "random stream create/delete churn with listings verified against an oracle"
    }

    async fn run(
        &self,
        broker: Arc<dyn Broker>,
        ctx: Arc<ScenarioContext>,
    ) -> Result<ScenarioReport, ScenarioError> {
        let config = ctx.config();
        let prefix = config.churn.prefix.clone();
        let min = config.churn.min_streams;
        let max = config.churn.max_streams;
        if max == 0 {
            return Err(ScenarioError::Config(
                "churn.max_streams must be at least 1".to_string(),
            ));
        }
        if min >= max {
            return Err(ScenarioError::Config(
                "churn.min_streams must be below churn.max_streams".to_string(),
            ));
        }
        let replicas = config.target.replicas;
        let progress_interval = config.progress.interval();

        let mut rng = ctx.rng();
        let mut oracle: BTreeSet<String> = BTreeSet::new();
        let mut next_name = 0u64;
        let mut creates = 0u64;
        let mut deletes = 0u64;
        let mut lists = 0u64;

        let options = ctx.connect_options("vigil-churn");
        let session = match ctx.retry("connect", || broker.connect(&options)).await? {
            Attempt::Done(session) => session,
            Attempt::Expired => {
                return Ok(ScenarioReport {
                    scenario: self.name(),
                    run_id: ctx.run_id(),
                    elapsed: ctx.elapsed(),
                    detail: ReportDetail::Churn {
                        creates,
                        deletes,
                        lists,
                        final_stream_count: 0,
                    },
                })
            }
        };

        info!(%prefix, min, max, "stream churn starting");
        let mut last_progress = Instant::now();

        'ops: while !ctx.expired() {
            let op = match choose_operation(oracle.len(), min, max) {
                Policy::Forced(op) => op,
                Policy::Uniform => match rng.gen_range(0..3) {
                    0 => ChurnOp::Create,
                    1 => ChurnOp::Delete,
                    _ => ChurnOp::List,
                },
            };

            match op {
                ChurnOp::Create => {
                    next_name += 1;
                    let name = format!("{prefix}-{next_name}");
                    let stream_config = StreamConfig::new(&name).with_replicas(replicas);
                    match ctx
                        .retry("create stream", || session.create_stream(&stream_config))
                        .await?
                    {
                        Attempt::Done(()) => {
                            debug!(name = name.as_str(), "stream created");
                            oracle.insert(name);
                            creates += 1;
                        }
                        Attempt::Expired => break 'ops,
                    }
                }
                ChurnOp::Delete => {
                    if oracle.is_empty() {
                        continue;
                    }
                    let index = rng.gen_range(0..oracle.len());
                    let Some(victim) = oracle.iter().nth(index).cloned() else {
                        continue;
                    };
                    match delete_reconciled(session.as_ref(), &ctx, &victim).await? {
                        Attempt::Done(()) => {
                            debug!(name = victim.as_str(), "stream deleted");
                            oracle.remove(&victim);
                            deletes += 1;
                        }
                        Attempt::Expired => break 'ops,
                    }
                }
                ChurnOp::List => {
                    let listed = match ctx.retry("list streams", || session.list_streams()).await? {
                        Attempt::Done(listed) => listed,
                        Attempt::Expired => break 'ops,
                    };
                    let listed: BTreeSet<String> = listed.into_iter().collect();
                    let missing: Vec<String> = oracle.difference(&listed).cloned().collect();
                    let unexpected: Vec<String> = listed.difference(&oracle).cloned().collect();
                    if !missing.is_empty() || !unexpected.is_empty() {
                        return Err(InvariantViolation::StreamSetDivergence {
                            missing,
                            unexpected,
                        }
                        .into());
                    }
                    lists += 1;
                }
            }

            if last_progress.elapsed() >= progress_interval {
                info!(creates, deletes, lists, live = oracle.len(), "churn progressing");
                last_progress = Instant::now();
            }
        }

        info!(creates, deletes, lists, remaining = oracle.len(), "stream churn finished");
        Ok(ScenarioReport {
            scenario: self.name(),
            run_id: ctx.run_id(),
            elapsed: ctx.elapsed(),
            detail: ReportDetail::Churn {
                creates,
                deletes,
                lists,
                final_stream_count: oracle.len(),
            },
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

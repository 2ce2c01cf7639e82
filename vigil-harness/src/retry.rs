//! Retry-bounded operations under two layered deadlines.
//!
//! Every broker call a scenario makes sits inside [`retry`]: transient
//! failures are absorbed and re-attempted on a fixed delay, a
//! per-operation budget turns persistent failure into
//! [`ScenarioError::Timeout`], and the experiment-wide deadline turns
//! "still retrying at the end of the run" into a graceful stop instead
//! of a failure. Definitive errors (not-found, conflict, exists) are
//! never retried here; they surface to the driver untouched.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use vigil_client::BrokerError;

use crate::error::ScenarioError;

/// Budget and pacing for one retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total time the operation may spend retrying.
    pub budget: Duration,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(30),
            delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of a retried operation that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The operation succeeded within its budget.
    Done(T),
    /// The experiment deadline fired mid-retry. The scenario should wind
    /// down successfully; whatever this operation was about no longer
    /// matters.
    Expired,
}

/// Run `attempt` until it succeeds, its budget runs out, or the
/// experiment ends.
///
/// The first attempt always runs. After a transient failure the loop
/// waits for the retry delay unless a deadline cuts the wait short; when
/// both deadlines are due the experiment deadline wins, so a run never
/// ends in a timeout that only exists because the run was over.
pub async fn retry<T, F, Fut>(
    operation: &'static str,
    policy: RetryPolicy,
    experiment_deadline: Instant,
    mut attempt: F,
) -> Result<Attempt<T>, ScenarioError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let op_deadline = Instant::now() + policy.budget;
    let mut last_error;
    loop {
        match attempt().await {
            Ok(value) => return Ok(Attempt::Done(value)),
            Err(error) if !error.is_transient() => return Err(error.into()),
            Err(error) => {
                warn!(operation, %error, "transient failure, will retry");
                last_error = error;
            }
        }

        let retry_at = Instant::now() + policy.delay;
        if experiment_deadline <= retry_at && experiment_deadline <= op_deadline {
            tokio::time::sleep_until(experiment_deadline).await;
            return Ok(Attempt::Expired);
        }
        if op_deadline <= retry_at {
            tokio::time::sleep_until(op_deadline).await;
            return Err(ScenarioError::Timeout {
                operation,
                budget: policy.budget,
                last_error,
            });
        }
        tokio::time::sleep_until(retry_at).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            budget: Duration::from_millis(200),
            delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn immediate_success_is_done() {
        let result = retry("op", quick_policy(), far_future(), || async {
            Ok::<_, BrokerError>(7)
        })
        .await
        .unwrap();
        assert_eq!(result, Attempt::Done(7));
    }

    #[tokio::test]
    async fn transient_failures_are_absorbed() {
        let attempts = AtomicU32::new(0);
        let result = retry("op", quick_policy(), far_future(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BrokerError::Unavailable("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, Attempt::Done(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_is_a_timeout_with_the_last_error() {
        let policy = RetryPolicy {
            budget: Duration::from_millis(40),
            delay: Duration::from_millis(10),
        };
        let result = retry("stubborn op", policy, far_future(), || async {
            Err::<(), _>(BrokerError::RequestTimeout)
        })
        .await;
        match result {
            Err(ScenarioError::Timeout {
                operation,
                last_error,
                ..
            }) => {
                assert_eq!(operation, "stubborn op");
                assert!(matches!(last_error, BrokerError::RequestTimeout));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn experiment_deadline_wins_over_budget() {
        // Both deadlines are due before the next retry; the experiment
        // deadline must take precedence.
        let deadline = Instant::now() + Duration::from_millis(30);
        let policy = RetryPolicy {
            budget: Duration::from_millis(30),
            delay: Duration::from_millis(10),
        };
        let result = retry("op", policy, deadline, || async {
            Err::<(), _>(BrokerError::Unavailable("down".into()))
        })
        .await
        .unwrap();
        assert_eq!(result, Attempt::Expired);
    }

    #[tokio::test]
    async fn experiment_expiry_mid_retry_is_graceful() {
        let deadline = Instant::now() + Duration::from_millis(30);
        let policy = RetryPolicy {
            budget: Duration::from_secs(30),
            delay: Duration::from_millis(10),
        };
        let result = retry("op", policy, deadline, || async {
            Err::<(), _>(BrokerError::RequestTimeout)
        })
        .await
        .unwrap();
        assert_eq!(result, Attempt::Expired);
    }

    #[tokio::test]
    async fn definitive_errors_fail_fast() {
        let attempts = AtomicU32::new(0);
        let result = retry("op", quick_policy(), far_future(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(BrokerError::KeyExists("counter".into())) }
        })
        .await;
        assert!(matches!(
            result,
            Err(ScenarioError::Broker(BrokerError::KeyExists(_)))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

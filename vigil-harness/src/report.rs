//! Result summaries produced by scenarios.
//!
//! Every scenario that finishes without a violation hands back a
//! [`ScenarioReport`]; the runner renders it for the operator. Reports
//! describe what was verified, not whether it passed: a failed invariant
//! never produces a report, it produces an error.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use uuid::Uuid;

use vigil_types::{Revision, SequencePair, WorkerId};

/// Summary of one finished scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Name of the scenario that produced this report.
    pub scenario: &'static str,
    /// Id of the run.
    pub run_id: Uuid,
    /// Wall time the run took.
    pub elapsed: Duration,
    /// Scenario-specific counters.
    pub detail: ReportDetail,
}

/// Scenario-specific counters.
#[derive(Debug, Clone)]
pub enum ReportDetail {
    /// Publish/fetch/ack verification rounds.
    Sequence {
        /// Rounds fully verified.
        rounds: u64,
        /// Sequence pair of the last acknowledged delivery.
        last_acked: SequencePair,
    },
    /// Contended counter climb.
    Cas {
        /// Per-worker outcome tally.
        tally: BTreeMap<WorkerId, WorkerStats>,
        /// Counter value the run started from.
        initial: u64,
        /// Counter value observed at the end, or `None` when the run
        /// ended before the verification read could complete.
        final_value: Option<u64>,
        /// Whether the configured ceiling was reached.
        reached_ceiling: bool,
    },
    /// Delivery-group fan-out.
    Group {
        /// Messages published and confirmed delivered.
        rounds: u64,
        /// Deliveries claimed by each subscriber.
        deliveries: BTreeMap<WorkerId, u64>,
    },
    /// Stream catalog churn.
    Churn {
        /// Streams created.
        creates: u64,
        /// Streams deleted.
        deletes: u64,
        /// Catalog listings verified.
        lists: u64,
        /// Streams left in the catalog at the end.
        final_stream_count: usize,
    },
    /// Key-value cell rewrites.
    Cells {
        /// Full write/read-back rounds completed.
        rounds: u64,
        /// Last verified revision of each cell.
        revisions: BTreeMap<String, Revision>,
    },
}

/// Success and conflict counts for one contending worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Updates that landed.
    pub successes: u64,
    /// Updates that lost the race and were retried.
    pub conflicts: u64,
}

impl ScenarioReport {
    /// Render the report as indented lines for the operator.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "scenario {} finished in {:.2}s (run {})",
            self.scenario,
            self.elapsed.as_secs_f64(),
            self.run_id
        );
        match &self.detail {
            ReportDetail::Sequence { rounds, last_acked } => {
                let _ = writeln!(out, "  rounds verified: {rounds}");
                let _ = writeln!(out, "  last acked: {last_acked}");
            }
            ReportDetail::Cas {
                tally,
                initial,
                final_value,
                reached_ceiling,
            } => {
                let updates: u64 = tally.values().map(|s| s.successes).sum();
                let conflicts: u64 = tally.values().map(|s| s.conflicts).sum();
                match final_value {
                    Some(final_value) => {
                        let _ = writeln!(
                            out,
                            "  counter advanced {initial} -> {final_value} ({updates} updates, {conflicts} conflicts)"
                        );
                    }
                    None => {
                        let _ = writeln!(
                            out,
                            "  counter started at {initial}; final value unverified ({updates} updates, {conflicts} conflicts)"
                        );
                    }
                }
                if *reached_ceiling {
                    let _ = writeln!(out, "  ceiling reached");
                }
                for (worker, stats) in tally {
                    let _ = writeln!(
                        out,
                        "  {:>9}  updates {:>6}  conflicts {:>6}",
                        worker.to_string(),
                        stats.successes,
                        stats.conflicts
                    );
                }
            }
            ReportDetail::Group { rounds, deliveries } => {
                let _ = writeln!(
                    out,
                    "  messages delivered: {rounds} across {} subscribers",
                    deliveries.len()
                );
                for (worker, count) in deliveries {
                    let _ = writeln!(out, "  {:>9}  received {:>6}", worker.to_string(), count);
                }
            }
            ReportDetail::Churn {
                creates,
                deletes,
                lists,
                final_stream_count,
            } => {
                let _ = writeln!(
                    out,
                    "  creates: {creates}, deletes: {deletes}, listings verified: {lists}"
                );
                let _ = writeln!(out, "  final catalog size: {final_stream_count}");
            }
            ReportDetail::Cells { rounds, revisions } => {
                let _ = writeln!(
                    out,
                    "  rounds completed: {rounds} across {} cells",
                    revisions.len()
                );
                for (key, revision) in revisions {
                    let _ = writeln!(out, "  {key} at revision {revision}");
                }
            }
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn report(detail: ReportDetail) -> ScenarioReport {
        ScenarioReport {
            scenario: "test-scenario",
            run_id: Uuid::nil(),
            elapsed: Duration::from_millis(1500),
            detail,
        }
    }

    #[test]
    fn sequence_report_lists_rounds_and_last_ack() {
        let rendered = report(ReportDetail::Sequence {
            rounds: 42,
            last_acked: SequencePair::new(42, 42),
        })
        .render();

        assert!(rendered.contains("test-scenario"));
        assert!(rendered.contains("1.50s"));
        assert!(rendered.contains("rounds verified: 42"));
        assert!(rendered.contains("last acked: (42, 42)"));
    }

    #[test]
    fn cas_report_totals_worker_tallies() {
        let mut tally = BTreeMap::new();
        tally.insert(
            WorkerId::new(0),
            WorkerStats {
                successes: 30,
                conflicts: 5,
            },
        );
        tally.insert(
            WorkerId::new(1),
            WorkerStats {
                successes: 29,
                conflicts: 7,
            },
        );

        let rendered = report(ReportDetail::Cas {
            tally,
            initial: 1,
            final_value: Some(60),
            reached_ceiling: true,
        })
        .render();

        assert!(rendered.contains("counter advanced 1 -> 60 (59 updates, 12 conflicts)"));
        assert!(rendered.contains("ceiling reached"));
        assert!(rendered.contains("worker-0"));
        assert!(rendered.contains("worker-1"));
    }

    #[test]
    fn cas_report_marks_an_unverified_final_value() {
        let rendered = report(ReportDetail::Cas {
            tally: BTreeMap::new(),
            initial: 1,
            final_value: None,
            reached_ceiling: false,
        })
        .render();

        assert!(rendered.contains("final value unverified"));
    }

    #[test]
    fn group_report_lists_every_subscriber() {
        let mut deliveries = BTreeMap::new();
        deliveries.insert(WorkerId::new(0), 4);
        deliveries.insert(WorkerId::new(1), 6);

        let rendered = report(ReportDetail::Group {
            rounds: 10,
            deliveries,
        })
        .render();

        assert!(rendered.contains("messages delivered: 10 across 2 subscribers"));
        assert!(rendered
            .lines()
            .any(|line| line.contains("worker-0") && line.contains('4')));
        assert!(rendered
            .lines()
            .any(|line| line.contains("worker-1") && line.contains('6')));
    }

    #[test]
    fn churn_report_shows_final_catalog_size() {
        let rendered = report(ReportDetail::Churn {
            creates: 12,
            deletes: 9,
            lists: 21,
            final_stream_count: 3,
        })
        .render();

        assert!(rendered.contains("creates: 12, deletes: 9, listings verified: 21"));
        assert!(rendered.contains("final catalog size: 3"));
    }

    #[test]
    fn cells_report_shows_revisions() {
        let mut revisions = BTreeMap::new();
        revisions.insert("cell-0".to_string(), Revision::new(17));

        let rendered = report(ReportDetail::Cells {
            rounds: 17,
            revisions,
        })
        .render();

        assert!(rendered.contains("rounds completed: 17 across 1 cells"));
        assert!(rendered.contains("cell-0 at revision 17"));
    }

    #[test]
    fn worker_stats_start_at_zero() {
        let stats = WorkerStats::default();
        assert_eq!(stats.successes, 0);
        assert_eq!(stats.conflicts, 0);
    }
}

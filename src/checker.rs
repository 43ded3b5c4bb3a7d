use crate::{
    proc::{StatRecord, TaskSourceOps},
    snapshot::SnapshotBuilder,
    state::{ExpectedValue, FormalizedId, LogicalState, StateSnapshot},
};

/// One thread whose observed state did not satisfy its expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub id: FormalizedId,
    pub observed: LogicalState,
    /// `None` when the expected vector has no entry for this thread.
    pub expected: Option<LogicalState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub snapshot: StateSnapshot,
    pub mismatches: Vec<Mismatch>,
}

impl CheckReport {
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compares validated snapshots against the expected state of each step.
///
/// The checker never mutates the registry or the expected vectors, so
/// repeating a check against unchanged threads gives the same answer.
pub struct Checker<S> {
    builder: SnapshotBuilder<S>,
}

impl<S: TaskSourceOps> Checker<S> {
    pub fn new(builder: SnapshotBuilder<S>) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &SnapshotBuilder<S> {
        &self.builder
    }

    /// Every entry of `snapshot` whose expectation is absent or different.
    pub fn compare(snapshot: &StateSnapshot, expected: &ExpectedValue) -> Vec<Mismatch> {
        snapshot
            .iter()
            .filter_map(|(id, observed)| {
                let exp = expected.get(id);
                match exp {
                    Some(e) if observed.matches(e) => None,
                    _ => Some(Mismatch {
                        id,
                        observed,
                        expected: exp,
                    }),
                }
            })
            .collect()
    }

    /// Takes a settled, invariant-respecting snapshot and compares it.
    pub fn check(&self, expected: &ExpectedValue) -> CheckReport {
        let snapshot = self.builder.capture();
        let mismatches = Self::compare(&snapshot, expected);
        CheckReport {
            snapshot,
            mismatches,
        }
    }

    pub fn run_check(&self, expected: &ExpectedValue) -> bool {
        self.check(expected).is_match()
    }

    /// Repeats [`check`](Self::check) until it passes.
    pub fn check_until_match(&self, expected: &ExpectedValue) -> StateSnapshot {
        loop {
            let report = self.check(expected);
            if report.is_match() {
                return report.snapshot;
            }
            std::hint::spin_loop();
        }
    }

    /// Diagnostic variant used when the watchdog fires.
    ///
    /// Still retries snapshots that break the invariant, but skips the settle
    /// spin and reports a mismatch instead of retrying it.
    pub fn current_snapshot_for(&self, expected: &ExpectedValue) -> CheckReport {
        let snapshot = self.builder.capture_unsettled();
        let mismatches = Self::compare(&snapshot, expected);
        CheckReport {
            snapshot,
            mismatches,
        }
    }

    pub fn check_priority(record: &StatRecord, expected_priority: i64) -> bool {
        record.rt_priority() == Some(expected_priority)
    }
}

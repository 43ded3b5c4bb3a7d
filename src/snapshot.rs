use crate::{
    config::CheckerConfig,
    probe::{busy_spin, RunningProbe},
    proc::{StatReader, TaskSourceOps},
    registry::ThreadIdRegistry,
    state::{FormalizedId, LogicalState, StateSnapshot},
    utils::sync::Arc,
};
use std::collections::BTreeMap;
use tracing::trace;

/// Assembles whole-population snapshots and rejects inconsistent ones.
pub struct SnapshotBuilder<S> {
    reader: StatReader<S>,
    registry: Arc<ThreadIdRegistry>,
    probe: RunningProbe,
    cores: usize,
    settle_iterations: u64,
}

impl<S: TaskSourceOps> SnapshotBuilder<S> {
    pub fn new(source: S, registry: Arc<ThreadIdRegistry>, config: &CheckerConfig) -> Self {
        Self {
            reader: StatReader::new(source),
            registry,
            probe: RunningProbe::new(config.busy_loop_count),
            cores: config.num_cores,
            settle_iterations: config.busy_loop_count,
        }
    }

    pub fn reader(&self) -> &StatReader<S> {
        &self.reader
    }

    pub fn registry(&self) -> &Arc<ThreadIdRegistry> {
        &self.registry
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    /// Takes one snapshot attempt without checking the invariant.
    ///
    /// Every visible thread is read and resolved to its formalized id,
    /// spinning on ids that have not registered yet. Threads that were
    /// registered before enumeration started but no longer have a task are
    /// reported as `Terminated`.
    pub fn sample(&self) -> StateSnapshot {
        let known: Vec<FormalizedId> = self.registry.entries().map(|(id, _)| id).collect();

        let mut records = BTreeMap::new();
        for tid in self.reader.list_until_ok() {
            // exited since enumeration; caught below if it had registered
            let Some(record) = self.reader.read_live(tid) else {
                continue;
            };
            let os_id = record.os_id().unwrap_or(tid);
            let id = self.registry.await_os_id(os_id);
            records.insert(id, (tid, record));
        }

        let mut states = self.probe.resolve(&self.reader, &records);
        for id in known {
            states.entry(id).or_insert(LogicalState::Terminated);
        }
        StateSnapshot::from(states)
    }

    /// Spins until a snapshot satisfies the scheduling invariant.
    ///
    /// Each attempt is preceded by a settle spin so the sampled threads get
    /// a chance to reach their next stable state.
    pub fn capture(&self) -> StateSnapshot {
        self.capture_with_settle(self.settle_iterations)
    }

    /// Like [`capture`](Self::capture) but without the settle spin.
    pub fn capture_unsettled(&self) -> StateSnapshot {
        self.capture_with_settle(0)
    }

    fn capture_with_settle(&self, settle: u64) -> StateSnapshot {
        let mut attempts = 0u64;
        loop {
            busy_spin(settle);
            let snapshot = self.sample();
            attempts += 1;
            if snapshot.satisfies_invariant(self.cores) {
                if attempts > 1 {
                    trace!(attempts, "snapshot settled");
                }
                return snapshot;
            }
            trace!(
                running = snapshot.running_count(),
                threads = snapshot.len(),
                cores = self.cores,
                "discarding snapshot taken mid-transition"
            );
        }
    }
}

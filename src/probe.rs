//! Running vs. ready disambiguation.
//!
//! The kernel reports `R` both for a thread that is executing on a core and
//! for one that is runnable but preempted. The probe samples the CPU time of
//! every `R` thread, spins for a calibrated interval, and samples again: a
//! thread whose ticks moved was scheduled during the interval and is
//! `Running`, the rest are `Ready`.
//!
//! The spin length is a calibration value for the machine at hand. Too short
//! and genuinely running threads never accumulate a tick and read as `Ready`;
//! too long and every check takes longer, which eats into the watchdog window.
use crate::{
    proc::{StatReader, StatRecord, TaskSourceOps},
    state::{FormalizedId, LogicalState, OsThreadId},
};
use std::collections::BTreeMap;
use tracing::trace;

/// Spins for `iterations` rounds without entering the kernel.
#[inline(never)]
pub fn busy_spin(iterations: u64) {
    for i in 0..iterations {
        std::hint::black_box(i);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunningProbe {
    spin_iterations: u64,
}

impl RunningProbe {
    pub fn new(spin_iterations: u64) -> Self {
        Self { spin_iterations }
    }

    pub fn spin_iterations(&self) -> u64 {
        self.spin_iterations
    }

    /// Resolves the logical state of every record.
    ///
    /// `records` maps each thread to the OS id it was read from and the
    /// record obtained during enumeration; that record is the T0 sample.
    /// One spin is shared by all `R` candidates.
    pub fn resolve<S: TaskSourceOps>(
        &self,
        reader: &StatReader<S>,
        records: &BTreeMap<FormalizedId, (OsThreadId, StatRecord)>,
    ) -> BTreeMap<FormalizedId, LogicalState> {
        let candidates: Vec<(FormalizedId, OsThreadId, u64)> = records
            .iter()
            .filter(|(_, (_, rec))| rec.state() == LogicalState::Running)
            .map(|(&id, (tid, rec))| (id, *tid, rec.cpu_ticks()))
            .collect();

        let mut states: BTreeMap<FormalizedId, LogicalState> = records
            .iter()
            .map(|(&id, (_, rec))| (id, rec.state()))
            .collect();

        if candidates.is_empty() {
            return states;
        }

        busy_spin(self.spin_iterations);

        for (id, tid, before) in candidates {
            let state = match reader.read_live(tid).map(|rec| rec.cpu_ticks()) {
                Some(after) if after > before => LogicalState::Running,
                Some(_) => LogicalState::Ready,
                None => LogicalState::Terminated,
            };
            trace!(id, tid, before, %state, "probed");
            states.insert(id, state);
        }
        states
    }

    /// Reads and resolves every thread of the source without a registry.
    ///
    /// Threads are keyed by listing position. A thread that is gone by the
    /// time its record is read is left out.
    pub fn survey<S: TaskSourceOps>(
        &self,
        reader: &StatReader<S>,
    ) -> Vec<(OsThreadId, StatRecord, LogicalState)> {
        let records: BTreeMap<FormalizedId, (OsThreadId, StatRecord)> = reader
            .list_until_ok()
            .into_iter()
            .filter_map(|tid| reader.read_live(tid).map(|rec| (tid, rec)))
            .enumerate()
            .collect();
        let mut states = self.resolve(reader, &records);
        records
            .into_iter()
            .map(|(pos, (tid, rec))| {
                let state = states.remove(&pos).unwrap_or(LogicalState::Unknown);
                (tid, rec, state)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, io};

    fn line(tid: OsThreadId, state: char, ticks: u64) -> String {
        let mut fields: Vec<String> = vec!["0".into(); 44];
        fields[0] = tid.to_string();
        fields[1] = format!("(t{tid})");
        fields[2] = state.to_string();
        fields[13] = ticks.to_string();
        fields.join(" ")
    }

    /// Every read after enumeration sees the T1 line. Listed threads
    /// without a line have already exited.
    struct AfterSpin(HashMap<OsThreadId, String>, Vec<OsThreadId>);

    impl AfterSpin {
        fn lines(lines: HashMap<OsThreadId, String>) -> Self {
            let mut listed: Vec<_> = lines.keys().copied().collect();
            listed.sort_unstable();
            Self(lines, listed)
        }
    }

    impl TaskSourceOps for AfterSpin {
        fn list_tasks(&self) -> io::Result<Vec<OsThreadId>> {
            Ok(self.1.clone())
        }

        fn read_stat(&self, tid: OsThreadId) -> io::Result<String> {
            self.0
                .get(&tid)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn read_process_stat(&self) -> io::Result<String> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    fn record(tid: OsThreadId, state: char, ticks: u64) -> (OsThreadId, StatRecord) {
        (tid, StatRecord::parse(&line(tid, state, ticks)).unwrap())
    }

    #[test]
    fn test_ticks_decide_running_or_ready() {
        let reader = StatReader::new(AfterSpin::lines(HashMap::from([
            (10, line(10, 'R', 7)),
            (11, line(11, 'R', 3)),
            (12, line(12, 'S', 3)),
        ])));
        let records = BTreeMap::from([
            (0, record(10, 'R', 5)),
            (1, record(11, 'R', 3)),
            (2, record(12, 'S', 3)),
        ]);

        let states = RunningProbe::new(0).resolve(&reader, &records);
        assert_eq!(states[&0], LogicalState::Running);
        assert_eq!(states[&1], LogicalState::Ready);
        assert_eq!(states[&2], LogicalState::Waiting);
    }

    #[test]
    fn test_candidate_gone_after_spin() {
        let reader = StatReader::new(AfterSpin::lines(HashMap::new()));
        let records = BTreeMap::from([(0, record(10, 'R', 5))]);

        let states = RunningProbe::new(0).resolve(&reader, &records);
        assert_eq!(states[&0], LogicalState::Terminated);
    }

    #[test]
    fn test_no_candidates_reads_nothing() {
        let reader = StatReader::new(AfterSpin::lines(HashMap::new()));
        let records = BTreeMap::from([(0, record(10, 'S', 1)), (1, record(11, 'Z', 1))]);

        let states = RunningProbe::new(1_000).resolve(&reader, &records);
        assert_eq!(states[&0], LogicalState::Waiting);
        assert_eq!(states[&1], LogicalState::Terminated);
    }

    #[test]
    fn test_survey_skips_exited_threads() {
        let lines = HashMap::from([(10, line(10, 'R', 4)), (12, line(12, 'S', 2))]);
        let reader = StatReader::new(AfterSpin(lines, vec![10, 11, 12]));

        let rows = RunningProbe::new(0).survey(&reader);
        let summary: Vec<_> = rows
            .iter()
            .map(|(tid, rec, state)| (*tid, rec.cpu_ticks(), *state))
            .collect();
        assert_eq!(
            summary,
            vec![(10, 4, LogicalState::Ready), (12, 2, LogicalState::Waiting)]
        );
    }
}

//! Logical thread states and the values built from them.
//!
//! The kernel reports one character per thread. [`LogicalState::classify`]
//! folds that character into the harness's four states (plus
//! [`LogicalState::Unknown`]); a [`StateSnapshot`] collects one state per
//! formalized thread id and knows whether it obeys the scheduling invariant.
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Dense id handed out by the driver at thread creation. Indexes expectation vectors.
pub type FormalizedId = usize;

/// Kernel thread id as reported by `gettid(2)` and `/proc/<pid>/task`.
pub type OsThreadId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalState {
    #[serde(alias = "READY")]
    Ready,
    #[serde(alias = "RUNNING")]
    Running,
    #[serde(alias = "WAITING")]
    Waiting,
    #[serde(alias = "TERMINATED")]
    Terminated,
    /// Sentinel for characters outside the known alphabet. Never matches.
    #[serde(skip_deserializing)]
    Unknown,
}

impl LogicalState {
    /// Maps a raw state character (see `proc(5)`) to a logical state.
    ///
    /// `R` is returned as [`LogicalState::Running`], but it is only a
    /// candidate: the kernel uses the same character for threads that are
    /// merely runnable. [`crate::probe::RunningProbe`] settles which is which.
    pub fn classify(ch: char) -> Self {
        match ch {
            'R' => Self::Running,
            // disk sleep, sleeping, idle, stopped, tracing stop, parked
            'D' | 'S' | 'I' | 'T' | 't' | 'P' => Self::Waiting,
            // waking, wakekill
            'W' | 'K' => Self::Ready,
            // zombie, dead
            'Z' | 'X' | 'x' => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    /// Whether an observed state satisfies an expectation.
    pub fn matches(self, expected: LogicalState) -> bool {
        self != Self::Unknown && self == expected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Waiting => "Waiting",
            Self::Terminated => "Terminated",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for LogicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected state of every formalized thread after one step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedValue(Vec<LogicalState>);

impl ExpectedValue {
    pub fn new(states: Vec<LogicalState>) -> Self {
        Self(states)
    }

    pub fn get(&self, id: FormalizedId) -> Option<LogicalState> {
        self.0.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn states(&self) -> &[LogicalState] {
        &self.0
    }
}

impl From<Vec<LogicalState>> for ExpectedValue {
    fn from(states: Vec<LogicalState>) -> Self {
        Self(states)
    }
}

/// One self-consistent view of the whole thread population, ordered by formalized id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    states: BTreeMap<FormalizedId, LogicalState>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: FormalizedId, state: LogicalState) {
        self.states.insert(id, state);
    }

    pub fn get(&self, id: FormalizedId) -> Option<LogicalState> {
        self.states.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormalizedId, LogicalState)> + '_ {
        self.states.iter().map(|(&id, &st)| (id, st))
    }

    pub fn running_count(&self) -> usize {
        self.states
            .values()
            .filter(|&&st| st == LogicalState::Running)
            .count()
    }

    /// Entries that compete for a core: everything not blocked or gone.
    pub fn live_count(&self) -> usize {
        self.states
            .values()
            .filter(|&&st| !matches!(st, LogicalState::Waiting | LogicalState::Terminated))
            .count()
    }

    /// The number of running threads must equal `min(live, cores)`.
    ///
    /// Anything else means the sample straddled a scheduling transition.
    /// Live counts only threads that can hold a core, so blocked and exited
    /// entries are left out rather than counting every entry. Otherwise
    /// fewer runnable threads than cores, as right after an exit, could
    /// never produce an acceptable snapshot.
    pub fn satisfies_invariant(&self, cores: usize) -> bool {
        self.running_count() == self.live_count().min(cores)
    }
}

impl From<BTreeMap<FormalizedId, LogicalState>> for StateSnapshot {
    fn from(states: BTreeMap<FormalizedId, LogicalState>) -> Self {
        Self { states }
    }
}

impl FromIterator<(FormalizedId, LogicalState)> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = (FormalizedId, LogicalState)>>(iter: I) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LogicalState::*;

    #[test]
    fn test_classify_known_alphabet() {
        assert_eq!(LogicalState::classify('R'), Running);
        for ch in ['D', 'S', 'I', 'T', 't', 'P'] {
            assert_eq!(LogicalState::classify(ch), Waiting, "char {ch:?}");
        }
        for ch in ['W', 'K'] {
            assert_eq!(LogicalState::classify(ch), Ready, "char {ch:?}");
        }
        for ch in ['Z', 'X', 'x'] {
            assert_eq!(LogicalState::classify(ch), Terminated, "char {ch:?}");
        }
    }

    #[test]
    fn test_classify_is_total() {
        let known = "RDSITtPWKZXx";
        for byte in 0u8..=127 {
            let ch = byte as char;
            let st = LogicalState::classify(ch);
            if known.contains(ch) {
                assert_ne!(st, Unknown, "char {ch:?}");
            } else {
                assert_eq!(st, Unknown, "char {ch:?}");
            }
        }
    }

    #[test]
    fn test_unknown_never_matches() {
        assert!(!Unknown.matches(Unknown));
        assert!(!Unknown.matches(Running));
        assert!(Ready.matches(Ready));
        assert!(!Ready.matches(Running));
    }

    #[test]
    fn test_invariant_uses_min_of_entries_and_cores() {
        let one: StateSnapshot = [(0, Running)].into_iter().collect();
        assert!(one.satisfies_invariant(2));

        let three: StateSnapshot = [(0, Running), (1, Running), (2, Ready)]
            .into_iter()
            .collect();
        assert!(three.satisfies_invariant(2));
        assert!(!three.satisfies_invariant(3));

        let starved: StateSnapshot = [(0, Ready), (1, Ready)].into_iter().collect();
        assert!(!starved.satisfies_invariant(2));

        assert!(StateSnapshot::new().satisfies_invariant(4));
    }

    #[test]
    fn test_invariant_ignores_blocked_and_exited_threads() {
        let after_exit: StateSnapshot = [(0, Running), (1, Terminated), (2, Waiting)]
            .into_iter()
            .collect();
        assert_eq!(after_exit.live_count(), 1);
        assert!(after_exit.satisfies_invariant(2));

        let preempted: StateSnapshot = [(0, Ready), (1, Waiting)].into_iter().collect();
        assert!(!preempted.satisfies_invariant(2));
    }

    #[test]
    fn test_expected_value_accepts_uppercase_names() {
        let exp: ExpectedValue = serde_json::from_str(r#"["READY", "Running", "WAITING"]"#).unwrap();
        assert_eq!(exp.states(), &[Ready, Running, Waiting]);
        assert!(serde_json::from_str::<ExpectedValue>(r#"["Unknown"]"#).is_err());
    }
}

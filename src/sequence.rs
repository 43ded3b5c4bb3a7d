//! Test sequences.
//!
//! A sequence is an ordered list of steps. Each step names the thread that
//! performs it, the operation, and the state every thread is expected to be
//! in once the operation has taken effect.
use crate::{
    error::SequenceError,
    state::{ExpectedValue, FormalizedId},
};
use serde::Deserialize;
use std::{fmt, fs, path::Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "func")]
pub enum Operation {
    PthreadCreate { priority: i32 },
    PthreadExit,
    PthreadMutexLock,
    PthreadMutexTrylock,
    PthreadMutexUnlock,
}

impl Operation {
    pub fn is_exit(&self) -> bool {
        matches!(self, Operation::PthreadExit)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::PthreadCreate { priority } => write!(f, "PthreadCreate[{priority}]"),
            Operation::PthreadExit => write!(f, "PthreadExit"),
            Operation::PthreadMutexLock => write!(f, "PthreadMutexLock"),
            Operation::PthreadMutexTrylock => write!(f, "PthreadMutexTrylock"),
            Operation::PthreadMutexUnlock => write!(f, "PthreadMutexUnlock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestStep {
    #[serde(flatten)]
    pub op: Operation,
    pub invoker: FormalizedId,
    pub expected: ExpectedValue,
}

/// Unvalidated form of a sequence file.
#[derive(Debug, Deserialize)]
pub struct RawSequence {
    steps: Vec<TestStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSequence")]
pub struct TestSequence {
    steps: Vec<TestStep>,
}

impl TryFrom<RawSequence> for TestSequence {
    type Error = SequenceError;

    fn try_from(raw: RawSequence) -> Result<Self, Self::Error> {
        Self::new(raw.steps)
    }
}

impl TestSequence {
    /// Builds and validates a sequence from steps.
    pub fn new(steps: Vec<TestStep>) -> Result<Self, SequenceError> {
        let seq = Self { steps };
        seq.validate()?;
        Ok(seq)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SequenceError> {
        let raw: RawSequence = serde_json::from_str(json)?;
        Self::new(raw.steps)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SequenceError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| SequenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Replays thread creation and exit to check that every step can run.
    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.steps.is_empty() {
            return Err(SequenceError::Empty);
        }

        let mut alive = vec![true];
        for (step, s) in self.steps.iter().enumerate() {
            if !alive.get(s.invoker).copied().unwrap_or(false) {
                return Err(SequenceError::InvokerNotAlive {
                    step,
                    invoker: s.invoker,
                });
            }
            match s.op {
                Operation::PthreadCreate { priority } => {
                    if !(1..=99).contains(&priority) {
                        return Err(SequenceError::InvalidPriority { step, priority });
                    }
                    alive.push(true);
                }
                Operation::PthreadExit => {
                    if s.invoker == 0 {
                        return Err(SequenceError::MainThreadExit { step });
                    }
                    alive[s.invoker] = false;
                }
                _ => {}
            }
            if s.expected.len() < alive.len() {
                return Err(SequenceError::ExpectedTooShort {
                    step,
                    len: s.expected.len(),
                    threads: alive.len(),
                });
            }
        }
        Ok(())
    }

    pub fn steps(&self) -> &[TestStep] {
        &self.steps
    }

    pub fn step(&self, idx: usize) -> Option<&TestStep> {
        self.steps.get(idx)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&TestStep> {
        self.steps.last()
    }

    /// Expectation to print when the sequence stalls at `idx`.
    ///
    /// A stall right after an exit is a stall in the post-exit recheck, so
    /// the exit step's expectation applies there.
    pub fn expected_for_dump(&self, idx: usize) -> Option<&ExpectedValue> {
        let idx = idx.min(self.steps.len().checked_sub(1)?);
        match idx.checked_sub(1).and_then(|p| self.steps.get(p)) {
            Some(prev) if prev.op.is_exit() => Some(&prev.expected),
            _ => self.steps.get(idx).map(|s| &s.expected),
        }
    }

    /// Total number of threads the sequence brings into existence,
    /// including the main thread.
    pub fn thread_count(&self) -> usize {
        1 + self
            .steps
            .iter()
            .filter(|s| matches!(s.op, Operation::PthreadCreate { .. }))
            .count()
    }
}

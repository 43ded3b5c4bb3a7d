//! Step sequencing.
//!
//! Every participant thread, the main thread included, runs the same loop:
//! it spins on the shared step index and, when the current step names it as
//! invoker, performs the step's operation, waits for the checker to confirm
//! the expected states and hands the sequence on. Nothing here blocks apart
//! from the subject mutex itself.
use crate::{
    checker::Checker,
    diag,
    error::{SchedCheckError, SetupError},
    proc::TaskSourceOps,
    registry::ThreadIdRegistry,
    rt::{self, SubjectMutex},
    sequence::{Operation, TestSequence},
    state::FormalizedId,
    utils::sync::{Arc, AtomicI32, AtomicUsize, Ordering},
    watchdog::{TimeoutDump, Watchdog},
};
use tracing::{debug, error, info};

pub const SUCCESS_MESSAGE: &str = "The test program has finished successfully.\n";

/// What a call to [`Driver::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The current step belongs to another thread, or the sequence is over.
    Idle,
    Performed,
    /// The caller performed `PthreadExit` and must end its thread.
    Exited,
}

pub struct Driver<S> {
    sequence: TestSequence,
    checker: Checker<S>,
    mutex: SubjectMutex,
    step_index: AtomicUsize,
    next_id: AtomicUsize,
    last_errno: AtomicI32,
    watchdog: Watchdog,
}

impl<S: TaskSourceOps + 'static> Driver<S> {
    pub fn new(sequence: TestSequence, checker: Checker<S>, watchdog: Watchdog) -> Self {
        Self {
            sequence,
            checker,
            mutex: SubjectMutex::new(),
            step_index: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            last_errno: AtomicI32::new(0),
            watchdog,
        }
    }

    pub fn sequence(&self) -> &TestSequence {
        &self.sequence
    }

    pub fn checker(&self) -> &Checker<S> {
        &self.checker
    }

    pub fn registry(&self) -> &Arc<ThreadIdRegistry> {
        self.checker.builder().registry()
    }

    pub fn step_index(&self) -> usize {
        self.step_index.load(Ordering::Acquire)
    }

    /// errno returned by the most recent mutex operation.
    pub fn last_errno(&self) -> i32 {
        self.last_errno.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.step_index() >= self.sequence.len()
    }

    /// Runs the current step if `me` is its invoker.
    pub fn step(self: &Arc<Self>, me: FormalizedId) -> Result<Progress, SchedCheckError> {
        let idx = self.step_index();
        let Some(step) = self.sequence.step(idx) else {
            return Ok(Progress::Idle);
        };
        if step.invoker != me {
            return Ok(Progress::Idle);
        }

        diag::log_memory_usage(self.checker.builder().reader());
        self.recheck_after_exit(idx);
        info!("{idx}: {} (TID: {me})", step.op);

        match step.op {
            Operation::PthreadCreate { priority } => self.create(priority)?,
            Operation::PthreadExit => {
                // nobody checks on behalf of a dead thread; the next invoker
                // rechecks this step's expectation
                self.step_index.store(idx + 1, Ordering::Release);
                return Ok(Progress::Exited);
            }
            Operation::PthreadMutexLock => self.record_errno(step.op, self.mutex.lock()),
            Operation::PthreadMutexTrylock => self.record_errno(step.op, self.mutex.try_lock()),
            Operation::PthreadMutexUnlock => self.record_errno(step.op, self.mutex.unlock()),
        }

        self.checker.check_until_match(&step.expected);
        self.step_index.store(idx + 1, Ordering::Release);
        self.watchdog.arm();
        Ok(Progress::Performed)
    }

    fn recheck_after_exit(&self, idx: usize) {
        if let Some(prev) = idx.checked_sub(1).and_then(|p| self.sequence.step(p)) {
            if prev.op.is_exit() {
                self.checker.check_until_match(&prev.expected);
            }
        }
    }

    fn record_errno(&self, op: Operation, errno: i32) {
        debug!(%op, errno, "mutex operation returned");
        self.last_errno.store(errno, Ordering::Release);
    }

    fn create(self: &Arc<Self>, priority: i32) -> Result<(), SetupError> {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let driver = Arc::clone(self);
        rt::spawn_fifo(priority, move || {
            if let Err(e) = driver.attach(id) {
                error!("thread {id} failed: {e}");
                // SAFETY: the run cannot continue without this participant
                unsafe { libc::_exit(1) };
            }
        })
        .map_err(|source| SetupError::Spawn { priority, source })
    }

    /// Registers the calling thread as `me` and runs the participant loop
    /// until it exits.
    pub fn attach(self: &Arc<Self>, me: FormalizedId) -> Result<(), SchedCheckError> {
        self.registry().register(me, rt::gettid())?;
        self.run_participant(me)
    }

    /// The per-thread loop. Returns only when this thread performed
    /// `PthreadExit`; the thread that observes the end of the sequence exits
    /// the process.
    pub fn run_participant(self: &Arc<Self>, me: FormalizedId) -> Result<(), SchedCheckError> {
        loop {
            if self.step(me)? == Progress::Exited {
                return Ok(());
            }
            if self.finish_if_done() {
                self.complete();
            }
            std::hint::spin_loop();
        }
    }

    /// Once every step has run, performs the outstanding post-exit recheck
    /// and reports whether the run is complete.
    pub fn finish_if_done(&self) -> bool {
        if !self.is_done() {
            return false;
        }
        if let Some(last) = self.sequence.last() {
            if last.op.is_exit() {
                self.checker.check_until_match(&last.expected);
            }
        }
        true
    }

    fn complete(&self) -> ! {
        self.watchdog.disarm();
        diag::raw_write(SUCCESS_MESSAGE);
        // SAFETY: every check has passed; other threads are abandoned
        unsafe { libc::_exit(0) }
    }

    /// Lines describing where the sequence stalled.
    pub fn timeout_report(&self) -> Vec<String> {
        let idx = self.step_index();
        match self.sequence.expected_for_dump(idx) {
            Some(expected) => {
                let report = self.checker.current_snapshot_for(expected);
                diag::snapshot_lines(&report.snapshot, expected)
            }
            None => Vec::new(),
        }
    }
}

impl<S: TaskSourceOps + 'static> TimeoutDump for Driver<S> {
    fn timeout_report(&self) -> Vec<String> {
        Driver::timeout_report(self)
    }
}

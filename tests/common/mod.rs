//! Shared fixtures: an in-memory task source whose threads can be scripted
//! from the test body while a checker reads them.
#![allow(dead_code)]

use parking_lot::Mutex;
use schedcheck::{
    config::CheckerConfig,
    proc::TaskSourceOps,
    state::OsThreadId,
};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    sync::Arc,
};

/// Renders a status line with the fields the checker reads filled in.
pub fn stat_line(tid: OsThreadId, state: char, ticks: u64, priority: i64) -> String {
    let mut fields: Vec<String> = vec!["0".into(); 44];
    fields[0] = tid.to_string();
    fields[1] = format!("(worker {tid})");
    fields[2] = state.to_string();
    fields[13] = (ticks / 2).to_string();
    fields[14] = (ticks - ticks / 2).to_string();
    fields[17] = (-priority - 1).to_string();
    fields[23] = "256".into();
    fields.join(" ")
}

/// A config that keeps spins short enough for unit-speed tests.
pub fn fast_config(cores: usize) -> CheckerConfig {
    CheckerConfig {
        busy_loop_count: 0,
        num_cores: cores,
        ..CheckerConfig::default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Task {
    pub state: char,
    pub ticks: u64,
    /// Ticks advance by one on every read, as for a thread on a core.
    pub on_cpu: bool,
    pub priority: i64,
}

impl Task {
    pub fn running() -> Self {
        Self {
            state: 'R',
            ticks: 0,
            on_cpu: true,
            priority: 1,
        }
    }

    pub fn ready() -> Self {
        Self {
            on_cpu: false,
            ..Self::running()
        }
    }

    pub fn sleeping() -> Self {
        Self {
            state: 'S',
            on_cpu: false,
            ..Self::running()
        }
    }

    pub fn with_priority(self, priority: i64) -> Self {
        Self { priority, ..self }
    }
}

pub enum Reply {
    Line(String),
    /// The task is gone.
    Missing,
    /// A transient failure such as a racing rewrite.
    Unreadable,
}

#[derive(Default)]
struct Inner {
    tasks: BTreeMap<OsThreadId, Task>,
    pending: HashMap<OsThreadId, VecDeque<Reply>>,
    list_failures: usize,
    stat_reads: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedTasks {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, tid: OsThreadId, task: Task) -> Self {
        self.set(tid, task);
        self
    }

    pub fn set(&self, tid: OsThreadId, task: Task) {
        self.inner.lock().tasks.insert(tid, task);
    }

    pub fn remove(&self, tid: OsThreadId) {
        self.inner.lock().tasks.remove(&tid);
    }

    /// Queues one-off replies served before the task's steady state.
    pub fn push_reply(&self, tid: OsThreadId, reply: Reply) {
        self.inner
            .lock()
            .pending
            .entry(tid)
            .or_default()
            .push_back(reply);
    }

    pub fn fail_listing(&self, times: usize) {
        self.inner.lock().list_failures = times;
    }

    pub fn stat_reads(&self) -> usize {
        self.inner.lock().stat_reads
    }
}

impl TaskSourceOps for ScriptedTasks {
    fn list_tasks(&self) -> io::Result<Vec<OsThreadId>> {
        let mut inner = self.inner.lock();
        if inner.list_failures > 0 {
            inner.list_failures -= 1;
            return Err(io::Error::from(io::ErrorKind::Interrupted));
        }
        Ok(inner.tasks.keys().copied().collect())
    }

    fn read_stat(&self, tid: OsThreadId) -> io::Result<String> {
        let mut inner = self.inner.lock();
        inner.stat_reads += 1;
        if let Some(reply) = inner.pending.get_mut(&tid).and_then(VecDeque::pop_front) {
            return match reply {
                Reply::Line(line) => Ok(line),
                Reply::Missing => Err(io::Error::from(io::ErrorKind::NotFound)),
                Reply::Unreadable => Err(io::Error::from(io::ErrorKind::Interrupted)),
            };
        }
        let task = inner
            .tasks
            .get_mut(&tid)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        let line = stat_line(tid, task.state, task.ticks, task.priority);
        if task.on_cpu {
            task.ticks += 1;
        }
        Ok(line)
    }

    fn read_process_stat(&self) -> io::Result<String> {
        let inner = self.inner.lock();
        let tid = inner.tasks.keys().next().copied().unwrap_or(1);
        Ok(stat_line(tid, 'S', 0, 0))
    }
}

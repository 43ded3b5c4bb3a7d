//! Per-thread status records.
//!
//! # Architecture
//!
//! [`TaskSourceOps`] abstracts where status lines come from. The production
//! implementation is [`ProcTasks`], which reads `/proc/<pid>/task/<tid>/stat`;
//! tests plug in scripted sources. On top of a source, [`StatReader`] retries
//! until it gets a usable [`StatRecord`].
//!
//! ## Field layout
//!
//! A stat line is a sequence of space separated fields. The ones used here,
//! 0-indexed:
//!
//! | index | field |
//! |---|---|
//! | 0 | thread id |
//! | 2 | state character |
//! | 13 | user CPU ticks |
//! | 14 | system CPU ticks |
//! | 17 | scheduling priority |
//! | 22 | virtual size |
//! | 23 | resident set size (pages) |
//!
//! Field 1 is the command name in parentheses and may itself contain spaces,
//! so it is split off by its closing parenthesis before the rest is tokenized.
use crate::{
    state::{LogicalState, OsThreadId},
    utils::sync::{AtomicBool, Ordering},
};
use std::io;
use tracing::warn;

mod procfs;

pub use procfs::ProcTasks;

pub const STAT_TID: usize = 0;
pub const STAT_STATE: usize = 2;
pub const STAT_UTIME: usize = 13;
pub const STAT_STIME: usize = 14;
pub const STAT_PRIORITY: usize = 17;
pub const STAT_VSIZE: usize = 22;
pub const STAT_RSS: usize = 23;

/// A record with fewer fields than this is a partial read.
pub const MIN_FIELDS: usize = STAT_RSS + 1;

pub trait TaskSourceOps: Send + Sync {
    /// OS ids of every thread currently visible in the process.
    fn list_tasks(&self) -> io::Result<Vec<OsThreadId>>;
    /// Raw status line of one thread.
    fn read_stat(&self, tid: OsThreadId) -> io::Result<String>;
    /// Raw status line of the process as a whole.
    fn read_process_stat(&self) -> io::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    fields: Vec<String>,
}

impl StatRecord {
    /// Parses a stat line, returning `None` for a partial record.
    pub fn parse(line: &str) -> Option<Self> {
        let fields = split_fields(line.trim_end());
        (fields.len() >= MIN_FIELDS).then_some(Self { fields })
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn numeric<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        self.field(index)?.parse().ok()
    }

    pub fn os_id(&self) -> Option<OsThreadId> {
        self.numeric(STAT_TID)
    }

    pub fn state_char(&self) -> Option<char> {
        self.field(STAT_STATE)?.chars().next()
    }

    /// Classified state, before running/ready disambiguation.
    pub fn state(&self) -> LogicalState {
        self.state_char()
            .map(LogicalState::classify)
            .unwrap_or(LogicalState::Unknown)
    }

    /// User plus system ticks consumed so far.
    pub fn cpu_ticks(&self) -> u64 {
        let utime: u64 = self.numeric(STAT_UTIME).unwrap_or(0);
        let stime: u64 = self.numeric(STAT_STIME).unwrap_or(0);
        utime + stime
    }

    /// Real-time priority, per `proc(5)`: the negated raw priority minus one.
    pub fn rt_priority(&self) -> Option<i64> {
        let raw: i64 = self.numeric(STAT_PRIORITY)?;
        Some(-raw - 1)
    }

    pub fn vsize(&self) -> Option<u64> {
        self.numeric(STAT_VSIZE)
    }

    pub fn rss_pages(&self) -> Option<u64> {
        self.numeric(STAT_RSS)
    }
}

fn split_fields(line: &str) -> Vec<String> {
    match (line.find('('), line.rfind(')')) {
        (Some(open), Some(close)) if open < close => {
            let mut fields = Vec::with_capacity(52);
            fields.extend(line[..open].split_whitespace().map(str::to_owned));
            fields.push(line[open..=close].to_owned());
            fields.extend(line[close + 1..].split_whitespace().map(str::to_owned));
            fields
        }
        _ => line.split_whitespace().map(str::to_owned).collect(),
    }
}

/// Reads status records, retrying until one is complete.
///
/// An unreadable or partial record is transient: the kernel rewrites these
/// files while threads change state. There is no retry limit; the process
/// watchdog bounds how long this can spin.
pub struct StatReader<S> {
    source: S,
    failing: AtomicBool,
}

impl<S: TaskSourceOps> StatReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            failing: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn read_until_complete(&self, tid: OsThreadId) -> StatRecord {
        loop {
            match self.source.read_stat(tid) {
                Ok(line) => {
                    self.failing.store(false, Ordering::Relaxed);
                    if let Some(record) = StatRecord::parse(&line) {
                        return record;
                    }
                }
                Err(e) => {
                    // warn on entering the failing state, not on every retry
                    if !self.failing.swap(true, Ordering::Relaxed) {
                        warn!(tid, error = %e, "failed to read thread status");
                    }
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Like [`read_until_complete`](Self::read_until_complete), but gives up
    /// once the task no longer exists.
    ///
    /// Any other failure, and any partial record, is still retried.
    pub fn read_live(&self, tid: OsThreadId) -> Option<StatRecord> {
        loop {
            match self.source.read_stat(tid) {
                Ok(line) => {
                    self.failing.store(false, Ordering::Relaxed);
                    if let Some(record) = StatRecord::parse(&line) {
                        return Some(record);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
                Err(e) => {
                    if !self.failing.swap(true, Ordering::Relaxed) {
                        warn!(tid, error = %e, "failed to read thread status");
                    }
                }
            }
            std::hint::spin_loop();
        }
    }

    pub fn list_until_ok(&self) -> Vec<OsThreadId> {
        loop {
            match self.source.list_tasks() {
                Ok(tids) => {
                    self.failing.store(false, Ordering::Relaxed);
                    return tids;
                }
                Err(e) => {
                    if !self.failing.swap(true, Ordering::Relaxed) {
                        warn!(error = %e, "failed to enumerate threads");
                    }
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Whole-process record; `None` when it cannot be read or is partial.
    pub fn read_process(&self) -> Option<StatRecord> {
        self.source
            .read_process_stat()
            .ok()
            .and_then(|line| StatRecord::parse(&line))
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::Relaxed)
    }
}

//! Diagnostic output.
//!
//! Two emitters exist. [`raw_write`] is a single `write(2)` with no
//! allocation or locking and is the only thing used while a signal handler
//! may have interrupted arbitrary code. Everything else goes through
//! `tracing`.
use crate::{
    proc::{StatReader, TaskSourceOps},
    state::{ExpectedValue, StateSnapshot},
};
use tracing::{debug, error};

pub fn raw_write(msg: &str) {
    // SAFETY: the pointer and length come from a valid &str
    unsafe {
        libc::write(libc::STDOUT_FILENO, msg.as_ptr().cast(), msg.len());
    }
}

/// One line per snapshot entry: observed state next to the expected one.
pub fn snapshot_lines(snapshot: &StateSnapshot, expected: &ExpectedValue) -> Vec<String> {
    snapshot
        .iter()
        .enumerate()
        .map(|(n, (id, observed))| match expected.get(id) {
            Some(exp) => format!("[{}]: TID {id}: {observed} (expected: {exp})", n + 1),
            None => {
                error!(id, "TID {id} is not found in the expected state");
                format!("[{}]: TID {id}: {observed} (expected: ?)", n + 1)
            }
        })
        .collect()
}

/// Writes [`snapshot_lines`] to stdout with [`raw_write`].
pub fn dump_snapshot(snapshot: &StateSnapshot, expected: &ExpectedValue) {
    for mut line in snapshot_lines(snapshot, expected) {
        line.push('\n');
        raw_write(&line);
    }
}

fn page_size_kb() -> u64 {
    // SAFETY: sysconf has no preconditions
    let bytes = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if bytes > 0 {
        bytes as u64 / 1024
    } else {
        4
    }
}

/// Resident set size of the process in KiB.
pub fn memory_usage_kb<S: TaskSourceOps>(reader: &StatReader<S>) -> Option<u64> {
    let pages = reader.read_process()?.rss_pages()?;
    Some(pages * page_size_kb())
}

pub fn log_memory_usage<S: TaskSourceOps>(reader: &StatReader<S>) {
    if let Some(kb) = memory_usage_kb(reader) {
        debug!(rss_kb = kb, "memory usage");
    }
}

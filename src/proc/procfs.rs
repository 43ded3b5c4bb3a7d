use super::TaskSourceOps;
use crate::state::OsThreadId;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Task source backed by the proc filesystem.
#[derive(Debug, Clone)]
pub struct ProcTasks {
    root: PathBuf,
}

impl ProcTasks {
    /// Threads of the calling process (`/proc/self`).
    pub fn current_process() -> Self {
        Self::with_root("/proc/self")
    }

    pub fn for_pid(pid: u32) -> Self {
        Self::with_root(format!("/proc/{pid}"))
    }

    /// `root` is a per-process directory such as `/proc/self`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self) -> PathBuf {
        self.root.join("task")
    }
}

impl Default for ProcTasks {
    fn default() -> Self {
        Self::current_process()
    }
}

fn first_line(contents: String) -> String {
    match contents.find('\n') {
        Some(end) => contents[..end].to_owned(),
        None => contents,
    }
}

impl TaskSourceOps for ProcTasks {
    fn list_tasks(&self) -> io::Result<Vec<OsThreadId>> {
        let mut tids: Vec<OsThreadId> = fs::read_dir(self.task_dir())?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        tids.sort_unstable();
        Ok(tids)
    }

    fn read_stat(&self, tid: OsThreadId) -> io::Result<String> {
        let path = self.task_dir().join(tid.to_string()).join("stat");
        fs::read_to_string(path).map(first_line)
    }

    fn read_process_stat(&self) -> io::Result<String> {
        fs::read_to_string(self.root.join("stat")).map(first_line)
    }
}

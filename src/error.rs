use crate::state::{FormalizedId, OsThreadId};
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedCheckError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid test sequence: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Thread registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Process setup failed: {0}")]
    Setup(#[from] SetupError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("core count must be at least 1")]
    NoCores,
    #[error("watchdog timeout must be at least 1 second")]
    NoWatchdog,
    #[error("registry capacity must be at least 1")]
    NoRegistryCapacity,
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed sequence: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("sequence contains no steps")]
    Empty,
    #[error("step {step}: invoker {invoker} is not a live thread")]
    InvokerNotAlive { step: usize, invoker: FormalizedId },
    #[error("step {step}: the main thread cannot exit")]
    MainThreadExit { step: usize },
    #[error("step {step}: priority {priority} is outside 1..=99")]
    InvalidPriority { step: usize, priority: i32 },
    #[error("step {step}: expected vector covers {len} threads but {threads} exist")]
    ExpectedTooShort {
        step: usize,
        len: usize,
        threads: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("formalized id {id} exceeds registry capacity {capacity}")]
    CapacityExhausted { id: FormalizedId, capacity: usize },
    #[error("formalized id {id} is already bound to OS thread {os_id}")]
    AlreadyRegistered { id: FormalizedId, os_id: OsThreadId },
    #[error("OS thread {os_id} is already bound to formalized id {id}")]
    OsIdTaken { os_id: OsThreadId, id: FormalizedId },
    #[error("OS thread id 0 cannot be registered")]
    InvalidOsId,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to set SCHED_FIFO priority {priority}: {source}")]
    SchedPolicy {
        priority: i32,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn a thread at priority {priority}: {source}")]
    Spawn {
        priority: i32,
        #[source]
        source: io::Error,
    },
    #[error("failed to install the watchdog handler: {0}")]
    Watchdog(#[source] io::Error),
    #[error("a watchdog is already installed in this process")]
    WatchdogInstalled,
}

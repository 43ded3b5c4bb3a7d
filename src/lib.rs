//! # schedcheck
//!
//! Checks that a Linux process's threads move through the scheduling states
//! a test sequence predicts under SCHED_FIFO.
//!
//! The main thread and every thread the sequence creates take turns
//! performing steps (thread creation, exit and operations on one shared
//! mutex). After each step the invoker samples the status record of every
//! thread in the process, separates running threads from preempted ones,
//! and waits until the observed states match the step's expectation. A
//! watchdog turns any stall into a failure with a dump of the current
//! states.
use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub mod checker;
pub mod config;
pub mod diag;
pub mod driver;
pub mod error;
pub mod probe;
pub mod proc;
pub mod registry;
pub mod rt;
pub mod sequence;
pub mod snapshot;
pub mod state;
pub mod utils;
pub mod watchdog;

use checker::Checker;
use config::CheckerConfig;
use driver::Driver;
use error::{RegistryError, SchedCheckError, SetupError};
use proc::ProcTasks;
use registry::ThreadIdRegistry;
use sequence::TestSequence;
use snapshot::SnapshotBuilder;
use utils::sync::Arc;
use watchdog::{TimeoutDump, Watchdog};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Checks real-time scheduling states against a test sequence"
)]
pub struct Args {
    /// JSON test sequence to run
    #[arg(value_name = "SEQUENCE")]
    pub sequence: PathBuf,
    /// Spin iterations for the settle and running probes
    #[arg(long, value_name = "N")]
    pub busy_loop: Option<u64>,
    #[arg(long, value_name = "SECS")]
    pub watchdog_secs: Option<u32>,
    /// Cores assumed by the scheduling invariant
    #[arg(long)]
    pub cores: Option<usize>,
    /// SCHED_FIFO priority of the main thread
    #[arg(long)]
    pub main_priority: Option<i32>,
    #[arg(long)]
    pub registry_capacity: Option<usize>,
    /// Validate the sequence and configuration, then exit
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    /// Overlays the flags that were given on `base`.
    pub fn apply(&self, mut base: CheckerConfig) -> CheckerConfig {
        if let Some(v) = self.busy_loop {
            base.busy_loop_count = v;
        }
        if let Some(v) = self.watchdog_secs {
            base.watchdog_secs = v;
        }
        if let Some(v) = self.cores {
            base.num_cores = v;
        }
        if let Some(v) = self.main_priority {
            base.main_priority = Some(v);
        }
        if let Some(v) = self.registry_capacity {
            base.registry_capacity = v;
        }
        base
    }

    pub fn config(&self) -> CheckerConfig {
        self.apply(CheckerConfig::from_env())
    }
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_cli() -> ExitCode {
    init_logging();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Loads and validates everything, then runs the sequence on the calling
/// thread. On success the process exits from inside the driver.
pub fn run(args: &Args) -> Result<(), SchedCheckError> {
    let config = args.config();
    config.validate()?;

    let sequence = TestSequence::load(&args.sequence)?;
    let threads = sequence.thread_count();
    if threads > config.registry_capacity {
        return Err(RegistryError::CapacityExhausted {
            id: threads - 1,
            capacity: config.registry_capacity,
        }
        .into());
    }
    info!(
        steps = sequence.len(),
        threads,
        cores = config.num_cores,
        busy_loop = config.busy_loop_count,
        "sequence loaded"
    );
    if args.dry_run {
        return Ok(());
    }

    let registry = Arc::new(ThreadIdRegistry::with_capacity(config.registry_capacity));
    let source = ProcTasks::with_root(config.proc_root.clone());
    let checker = Checker::new(SnapshotBuilder::new(source, registry, &config));
    diag::log_memory_usage(checker.builder().reader());

    let watchdog = Watchdog::new(config.watchdog_secs);
    let driver = Arc::new(Driver::new(sequence, checker, watchdog));
    let hook: Arc<dyn TimeoutDump> = driver.clone();
    watchdog.install(hook)?;
    watchdog.arm();

    let priority = config.main_priority();
    rt::set_current_fifo(priority)
        .map_err(|source| SetupError::SchedPolicy { priority, source })?;
    info!(priority, "main thread switched to SCHED_FIFO");

    driver.attach(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from(["schedcheck", "seq.json", "--cores", "3", "--busy-loop", "42"]);
        let config = args.apply(CheckerConfig {
            num_cores: 8,
            ..CheckerConfig::default()
        });
        assert_eq!(config.num_cores, 3);
        assert_eq!(config.busy_loop_count, 42);
        assert_eq!(config.main_priority, None);
        assert!(!args.dry_run);
    }
}

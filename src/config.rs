//! Tunable parameters.
//!
//! ## Environment Variables
//!
//! - `SCHEDCHECK_BUSY_LOOP`: spin iterations used both before each snapshot
//!   attempt and as the running/ready probe interval (default: 10000000)
//! - `SCHEDCHECK_WATCHDOG_SECS`: seconds without progress before the process
//!   is declared hung (default: 6)
//! - `SCHEDCHECK_CORES`: cores assumed by the scheduling invariant
//!   (default: the size of the process affinity mask)
//!
//! Command-line flags override the environment, which overrides defaults.
use crate::{error::ConfigError, rt};
use std::{path::PathBuf, str::FromStr};
use tracing::warn;

pub const DEFAULT_BUSY_LOOP: u64 = 10_000_000;
pub const DEFAULT_WATCHDOG_SECS: u32 = 6;
pub const DEFAULT_CORES: usize = 2;
pub const DEFAULT_REGISTRY_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerConfig {
    pub busy_loop_count: u64,
    pub watchdog_secs: u32,
    pub num_cores: usize,
    /// Per-process proc directory whose `task/` entries are observed.
    pub proc_root: PathBuf,
    pub registry_capacity: usize,
    /// SCHED_FIFO priority of the main thread; the policy minimum when unset.
    pub main_priority: Option<i32>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            busy_loop_count: DEFAULT_BUSY_LOOP,
            watchdog_secs: DEFAULT_WATCHDOG_SECS,
            num_cores: rt::available_cores().unwrap_or(DEFAULT_CORES),
            proc_root: PathBuf::from("/proc/self"),
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            main_priority: None,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

impl CheckerConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env(|name| std::env::var(name).ok())
    }

    /// Overlays values found through `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_var(&lookup, "SCHEDCHECK_BUSY_LOOP") {
            self.busy_loop_count = v;
        }
        if let Some(v) = parse_var(&lookup, "SCHEDCHECK_WATCHDOG_SECS") {
            self.watchdog_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SCHEDCHECK_CORES") {
            self.num_cores = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_cores == 0 {
            return Err(ConfigError::NoCores);
        }
        if self.watchdog_secs == 0 {
            return Err(ConfigError::NoWatchdog);
        }
        if self.registry_capacity == 0 {
            return Err(ConfigError::NoRegistryCapacity);
        }
        Ok(())
    }

    pub fn main_priority(&self) -> i32 {
        self.main_priority.unwrap_or_else(rt::fifo_priority_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overlays_defaults() {
        let env = HashMap::from([
            ("SCHEDCHECK_BUSY_LOOP", "2500"),
            ("SCHEDCHECK_CORES", " 4 "),
            ("SCHEDCHECK_WATCHDOG_SECS", "soon"),
        ]);
        let config = CheckerConfig::default().with_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.busy_loop_count, 2500);
        assert_eq!(config.num_cores, 4);
        assert_eq!(config.watchdog_secs, DEFAULT_WATCHDOG_SECS);
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let base = CheckerConfig {
            num_cores: 2,
            ..CheckerConfig::default()
        };
        assert_eq!(base.validate(), Ok(()));
        assert_eq!(
            CheckerConfig { num_cores: 0, ..base.clone() }.validate(),
            Err(ConfigError::NoCores)
        );
        assert_eq!(
            CheckerConfig { watchdog_secs: 0, ..base.clone() }.validate(),
            Err(ConfigError::NoWatchdog)
        );
        assert_eq!(
            CheckerConfig { registry_capacity: 0, ..base }.validate(),
            Err(ConfigError::NoRegistryCapacity)
        );
    }
}

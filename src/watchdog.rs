//! SIGALRM watchdog.
//!
//! Every completed step re-arms `alarm(2)`. If the alarm ever fires the run
//! is declared hung: the failure line goes out through [`raw_write`], a
//! secondary handler is armed to bound the diagnostic dump, the current
//! states are printed and the process exits with status 1.
//!
//! Signal handlers take no context argument, so the dump source is reached
//! through one process-wide slot that can be filled exactly once.
use crate::{
    diag::raw_write,
    error::SetupError,
    utils::sync::{Arc, AtomicU32, OnceLock, Ordering},
};
use std::io;
use tracing::debug;

pub const TIMEOUT_MESSAGE: &str = "The test program has failed (TIMEOUT).\n";
pub const DUMP_TIMEOUT_MESSAGE: &str =
    "The debug print for the current states has failed (TIMEOUT).\n";

/// Produces the lines printed when the watchdog fires.
///
/// Called from the signal handler. Implementations may allocate and read
/// files, which is not async-signal-safe; the secondary alarm bounds how long
/// that may take.
pub trait TimeoutDump: Send + Sync {
    fn timeout_report(&self) -> Vec<String>;
}

static HOOK: OnceLock<Arc<dyn TimeoutDump>> = OnceLock::new();
static DUMP_SECS: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchdog {
    secs: u32,
}

fn set_handler(handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
    // SAFETY: sigaction is zero-initialisable and fully set up before use
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = 0;
        if libc::sigaction(libc::SIGALRM, &sa, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

extern "C" fn on_dump_timeout(_: libc::c_int) {
    raw_write(DUMP_TIMEOUT_MESSAGE);
    // SAFETY: _exit is async-signal-safe
    unsafe { libc::_exit(1) };
}

extern "C" fn on_timeout(_: libc::c_int) {
    raw_write(TIMEOUT_MESSAGE);
    if set_handler(on_dump_timeout).is_ok() {
        // SAFETY: alarm is async-signal-safe
        unsafe { libc::alarm(DUMP_SECS.load(Ordering::Relaxed)) };
        if let Some(hook) = HOOK.get() {
            for mut line in hook.timeout_report() {
                line.push('\n');
                raw_write(&line);
            }
        }
    }
    // SAFETY: as above
    unsafe { libc::_exit(1) };
}

impl Watchdog {
    pub fn new(secs: u32) -> Self {
        Self { secs }
    }

    /// A watchdog whose arm and disarm do nothing.
    pub fn disabled() -> Self {
        Self { secs: 0 }
    }

    pub fn secs(&self) -> u32 {
        self.secs
    }

    /// Budget for the diagnostic dump once the watchdog has fired.
    pub fn dump_secs(&self) -> u32 {
        self.secs.saturating_mul(2)
    }

    pub fn is_enabled(&self) -> bool {
        self.secs > 0
    }

    /// Installs the SIGALRM handler with `hook` as its dump source.
    pub fn install(&self, hook: Arc<dyn TimeoutDump>) -> Result<(), SetupError> {
        if !self.is_enabled() {
            return Ok(());
        }
        HOOK.set(hook).map_err(|_| SetupError::WatchdogInstalled)?;
        DUMP_SECS.store(self.dump_secs(), Ordering::Relaxed);
        set_handler(on_timeout).map_err(SetupError::Watchdog)?;
        debug!(secs = self.secs, "watchdog installed");
        Ok(())
    }

    /// Restarts the countdown.
    pub fn arm(&self) {
        if self.is_enabled() {
            // SAFETY: no preconditions
            unsafe { libc::alarm(self.secs) };
        }
    }

    pub fn disarm(&self) {
        if self.is_enabled() {
            // SAFETY: no preconditions
            unsafe { libc::alarm(0) };
        }
    }
}

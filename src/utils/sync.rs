//! Synchronization primitives shared by the checker and the driver.
//!
//! The observation path is built from atomics only. Nothing re-exported here
//! may block, since a blocked checker would itself change the scheduling
//! state it is measuring.
pub use std::sync::{
    atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    Arc, OnceLock,
};

/// Spins until `f` yields a value.
///
/// Used for every "wait for condition" on the observation path instead of a
/// blocking primitive.
#[inline]
pub fn spin_until<T>(mut f: impl FnMut() -> Option<T>) -> T {
    loop {
        if let Some(value) = f() {
            return value;
        }
        std::hint::spin_loop();
    }
}

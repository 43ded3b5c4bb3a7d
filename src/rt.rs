//! Real-time thread plumbing over `libc`.
use crate::state::OsThreadId;
use std::{cell::UnsafeCell, io, mem::MaybeUninit, panic};
use tracing::error;

const PTHREAD_EXPLICIT_SCHED: libc::c_int = 1;

// Not exported by the libc crate for every linux target.
extern "C" {
    fn pthread_attr_setinheritsched(
        attr: *mut libc::pthread_attr_t,
        inherit: libc::c_int,
    ) -> libc::c_int;
    fn pthread_attr_setschedpolicy(
        attr: *mut libc::pthread_attr_t,
        policy: libc::c_int,
    ) -> libc::c_int;
    fn pthread_attr_setschedparam(
        attr: *mut libc::pthread_attr_t,
        param: *const libc::sched_param,
    ) -> libc::c_int;
}

/// Kernel id of the calling thread, as it appears under `/proc/<pid>/task`.
pub fn gettid() -> OsThreadId {
    // SAFETY: gettid has no preconditions and cannot fail
    unsafe { libc::syscall(libc::SYS_gettid) as OsThreadId }
}

pub fn fifo_priority_min() -> i32 {
    // SAFETY: no preconditions
    unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) }
}

/// Number of CPUs the process may run on.
pub fn available_cores() -> Option<usize> {
    // SAFETY: cpu_set_t is plain data; the kernel fills it on success
    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed().assume_init();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return None;
        }
        match libc::CPU_COUNT(&set) {
            n if n > 0 => Some(n as usize),
            _ => None,
        }
    }
}

/// Moves the calling thread to SCHED_FIFO at `priority`.
pub fn set_current_fifo(priority: i32) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: param outlives the call
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn check(ret: libc::c_int) -> io::Result<()> {
    match ret {
        0 => Ok(()),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}

type Entry = Box<dyn FnOnce() + Send + 'static>;

extern "C" fn trampoline(arg: *mut libc::c_void) -> *mut libc::c_void {
    // SAFETY: arg was produced by Box::into_raw in spawn_fifo
    let entry = unsafe { Box::from_raw(arg as *mut Entry) };
    if panic::catch_unwind(panic::AssertUnwindSafe(entry)).is_err() {
        error!("participant thread panicked");
        // SAFETY: unwinding across the C boundary is not allowed
        unsafe { libc::_exit(1) };
    }
    std::ptr::null_mut()
}

/// Spawns a detached thread that starts directly under SCHED_FIFO at
/// `priority` instead of inheriting the creator's policy.
pub fn spawn_fifo<F>(priority: i32, f: F) -> io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let entry: Box<Entry> = Box::new(Box::new(f));
    let param = libc::sched_param {
        sched_priority: priority,
    };

    // SAFETY: attr is initialised before use and destroyed on every path;
    // the entry box is reclaimed here if the thread never starts
    unsafe {
        let mut attr = MaybeUninit::<libc::pthread_attr_t>::uninit();
        check(libc::pthread_attr_init(attr.as_mut_ptr()))?;
        let attr_ptr = attr.as_mut_ptr();

        let configured = check(pthread_attr_setinheritsched(attr_ptr, PTHREAD_EXPLICIT_SCHED))
            .and_then(|_| check(pthread_attr_setschedpolicy(attr_ptr, libc::SCHED_FIFO)))
            .and_then(|_| check(pthread_attr_setschedparam(attr_ptr, &param)))
            .and_then(|_| {
                check(libc::pthread_attr_setdetachstate(
                    attr_ptr,
                    libc::PTHREAD_CREATE_DETACHED,
                ))
            });

        let result = configured.and_then(|_| {
            let raw = Box::into_raw(entry);
            let mut thread: libc::pthread_t = 0;
            let ret = libc::pthread_create(&mut thread, attr_ptr, trampoline, raw.cast());
            if ret != 0 {
                drop(Box::from_raw(raw));
            }
            check(ret)
        });

        libc::pthread_attr_destroy(attr_ptr);
        result
    }
}

/// The process-wide mutex whose contention the test sequences exercise.
///
/// A raw `pthread_mutex_t` so that blocked lockers sleep in the kernel and
/// show up as `S` in their status records.
pub struct SubjectMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: pthread mutexes are shared between threads by construction. The
// mutex is not used before it reaches its final address.
unsafe impl Send for SubjectMutex {}
unsafe impl Sync for SubjectMutex {}

impl SubjectMutex {
    pub fn new() -> Self {
        Self {
            inner: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        }
    }

    /// Returns the errno of `pthread_mutex_lock`, 0 on success.
    pub fn lock(&self) -> i32 {
        // SAFETY: inner is a valid initialised mutex
        unsafe { libc::pthread_mutex_lock(self.inner.get()) }
    }

    pub fn try_lock(&self) -> i32 {
        // SAFETY: as above
        unsafe { libc::pthread_mutex_trylock(self.inner.get()) }
    }

    pub fn unlock(&self) -> i32 {
        // SAFETY: as above
        unsafe { libc::pthread_mutex_unlock(self.inner.get()) }
    }
}

impl Default for SubjectMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubjectMutex {
    fn drop(&mut self) {
        // SAFETY: no thread can hold a reference once we are dropped
        unsafe {
            libc::pthread_mutex_destroy(self.inner.get());
        }
    }
}

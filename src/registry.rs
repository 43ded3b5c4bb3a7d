//! Bidirectional mapping between formalized and OS thread ids.
//!
//! Formalized ids are dense, so the registry is a fixed array of atomic
//! slots indexed by formalized id, each holding the bound OS id (or 0 while
//! unbound). Slots are written exactly once with a compare-exchange and never
//! cleared, so a thread that has exited stays resolvable. Readers never
//! block: a miss means "not yet visible" and callers that need the entry spin
//! via [`ThreadIdRegistry::await_os_id`].
use crate::{
    error::RegistryError,
    state::{FormalizedId, OsThreadId},
    utils::sync::{spin_until, AtomicU32, Ordering},
};

const UNBOUND: OsThreadId = 0;

pub struct ThreadIdRegistry {
    slots: Box<[AtomicU32]>,
}

impl ThreadIdRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU32::new(UNBOUND)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Binds `id` to `os_id`. Each side may be bound only once.
    pub fn register(&self, id: FormalizedId, os_id: OsThreadId) -> Result<(), RegistryError> {
        if os_id == UNBOUND {
            return Err(RegistryError::InvalidOsId);
        }
        let slot = self.slots.get(id).ok_or(RegistryError::CapacityExhausted {
            id,
            capacity: self.capacity(),
        })?;
        if let Some(existing) = self.resolve_by_os_id(os_id) {
            return Err(RegistryError::OsIdTaken {
                os_id,
                id: existing,
            });
        }
        slot.compare_exchange(UNBOUND, os_id, Ordering::Release, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| RegistryError::AlreadyRegistered {
                id,
                os_id: current,
            })
    }

    pub fn resolve_by_os_id(&self, os_id: OsThreadId) -> Option<FormalizedId> {
        if os_id == UNBOUND {
            return None;
        }
        self.slots
            .iter()
            .position(|slot| slot.load(Ordering::Acquire) == os_id)
    }

    pub fn resolve_by_formalized_id(&self, id: FormalizedId) -> Option<OsThreadId> {
        match self.slots.get(id)?.load(Ordering::Acquire) {
            UNBOUND => None,
            os_id => Some(os_id),
        }
    }

    /// Spins until `os_id` has been registered.
    ///
    /// A freshly created thread shows up in the task list before it has had
    /// a chance to register itself.
    pub fn await_os_id(&self, os_id: OsThreadId) -> FormalizedId {
        spin_until(|| self.resolve_by_os_id(os_id))
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire) != UNBOUND)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = (FormalizedId, OsThreadId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| match slot.load(Ordering::Acquire) {
                UNBOUND => None,
                os_id => Some((id, os_id)),
            })
    }
}

impl std::fmt::Debug for ThreadIdRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

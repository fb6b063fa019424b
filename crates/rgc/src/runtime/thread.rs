//! Mutator Threads - Registry of Allocating Threads
//!
//! Every thread that allocates through a TLAB is registered here. The region
//! space walks the registry to revoke all buffers before a collection.
//!
//! ## Lock Order
//!
//! ```text
//! shutdown lock ──▶ thread-list lock ──▶ region lock ──▶ thread TLAB lock
//! ```
//!
//! Registration takes the first two; global revocation takes all four.

use crate::allocator::Tlab;
use crate::error::{Result, RgcError};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a registered mutator thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutatorId(u64);

impl MutatorId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MutatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MutatorThread - an allocating thread and its TLAB
pub struct MutatorThread {
    /// Registry-assigned identifier
    id: MutatorId,

    /// Name for diagnostics
    name: String,

    /// Current allocation buffer
    tlab: Mutex<Tlab>,
}

impl MutatorThread {
    /// Create a thread record with no TLAB
    pub fn new(id: MutatorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tlab: Mutex::new(Tlab::default()),
        }
    }

    pub fn id(&self) -> MutatorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the thread currently holds a TLAB
    pub fn has_tlab(&self) -> bool {
        self.tlab.lock().is_active()
    }

    /// Copy of the current buffer state
    pub fn tlab(&self) -> Tlab {
        self.tlab.lock().clone()
    }

    /// Allocate from the thread's TLAB
    ///
    /// # Returns
    /// * `Some(addr)` - Start of the new object
    /// * `None` - No TLAB, or not enough room left in it
    pub fn alloc_in_tlab(&self, size: usize, alignment: usize) -> Option<usize> {
        self.tlab.lock().alloc(size, alignment)
    }

    pub(crate) fn lock_tlab(&self) -> MutexGuard<'_, Tlab> {
        self.tlab.lock()
    }
}

impl fmt::Debug for MutatorThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutatorThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tlab", &*self.tlab.lock())
            .finish()
    }
}

/// ThreadRegistry - all mutator threads known to the runtime
pub struct ThreadRegistry {
    /// Held while threads are added, removed or walked; `true` once shutting down
    shutdown: Mutex<bool>,

    /// Registered threads in registration order
    threads: Mutex<IndexMap<MutatorId, Arc<MutatorThread>>>,

    /// Next identifier to hand out
    next_id: AtomicU64,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            shutdown: Mutex::new(false),
            threads: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new mutator thread
    ///
    /// # Returns
    /// * `Ok(thread)` - Registered thread, without a TLAB
    /// * `Err(RgcError::InvalidState)` - The registry is shutting down
    pub fn register(&self, name: impl Into<String>) -> Result<Arc<MutatorThread>> {
        let shutdown = self.shutdown.lock();
        if *shutdown {
            return Err(RgcError::InvalidState {
                expected: "running registry".to_string(),
                actual: "shutting down".to_string(),
            });
        }

        let id = MutatorId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let thread = Arc::new(MutatorThread::new(id, name));
        self.threads.lock().insert(id, Arc::clone(&thread));
        log::trace!("registered mutator {} ({})", id, thread.name());
        Ok(thread)
    }

    /// Remove a thread; its TLAB must already be revoked
    pub fn unregister(&self, id: MutatorId) -> Option<Arc<MutatorThread>> {
        let _shutdown = self.shutdown.lock();
        let thread = self.threads.lock().shift_remove(&id);
        if let Some(thread) = &thread {
            debug_assert!(
                !thread.has_tlab(),
                "mutator {} unregistered while holding a TLAB",
                id
            );
        }
        thread
    }

    pub fn get(&self, id: MutatorId) -> Option<Arc<MutatorThread>> {
        self.threads.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }

    /// Snapshot of the registered threads
    pub fn threads(&self) -> Vec<Arc<MutatorThread>> {
        self.threads.lock().values().cloned().collect()
    }

    /// Refuse further registrations
    pub fn begin_shutdown(&self) {
        *self.shutdown.lock() = true;
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.lock()
    }

    /// Visit every thread with the shutdown and thread-list locks held
    pub(crate) fn for_each_locked<F: FnMut(&MutatorThread)>(&self, mut visitor: F) {
        let _shutdown = self.shutdown.lock();
        let threads = self.threads.lock();
        for thread in threads.values() {
            visitor(thread);
        }
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

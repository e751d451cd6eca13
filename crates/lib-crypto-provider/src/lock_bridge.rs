//! Bridge from the backend's numbered-lock callback to the mutex pool.
//!
//! The backend protects its internal tables with `num_locks()` numbered
//! locks and asks a single global callback to take or drop lock `n`. The
//! bridge owns one pool mutex per index and registers a closure over that
//! table as the callback, unless some other component registered one first.

use crate::backend::CryptoBackend;
use crate::error::{ProviderError, ProviderResult};
use crate::mutex::{MutexPool, PoolMutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the backend wants lock `n` taken or dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Lock,
    Unlock,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lock => f.write_str("lock"),
            Self::Unlock => f.write_str("unlock"),
        }
    }
}

/// The backend's global locking callback.
pub type LockingCallback = Arc<dyn Fn(LockMode, usize) + Send + Sync>;

/// Fixed table of pool mutexes indexed by lock id.
pub struct LockTable {
    mutexes: Vec<Arc<dyn PoolMutex>>,
}

impl LockTable {
    /// Take exactly `count` mutexes from `pool`.
    ///
    /// On exhaustion every mutex taken so far goes back to the pool.
    pub fn acquire(pool: &dyn MutexPool, count: usize) -> ProviderResult<Self> {
        let mut mutexes = Vec::with_capacity(count);
        for index in 0..count {
            match pool.get_mutex() {
                Some(mutex) => mutexes.push(mutex),
                None => {
                    tracing::error!(index, count, "Mutex pool exhausted");
                    for mutex in mutexes {
                        pool.recycle_mutex(mutex);
                    }
                    return Err(ProviderError::AllocationFailure {
                        what: format!("{count} pool mutexes (got {index})"),
                    });
                }
            }
        }
        Ok(Self { mutexes })
    }

    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }

    pub fn lock(&self, index: usize) -> ProviderResult<()> {
        self.slot(index)?.lock();
        Ok(())
    }

    pub fn unlock(&self, index: usize) -> ProviderResult<()> {
        self.slot(index)?.unlock();
        Ok(())
    }

    /// Callback entry point. Out-of-range indices are reported and ignored.
    pub fn dispatch(&self, mode: LockMode, index: usize) {
        let _ = match mode {
            LockMode::Lock => self.lock(index),
            LockMode::Unlock => self.unlock(index),
        };
    }

    fn slot(&self, index: usize) -> ProviderResult<&Arc<dyn PoolMutex>> {
        self.mutexes.get(index).ok_or_else(|| {
            let count = self.mutexes.len();
            tracing::error!(index, count, "Lock index out of range [0..{count})");
            ProviderError::LockIndexOutOfRange { index, count }
        })
    }

    /// Hand every mutex back to the pool.
    pub fn release(&self, pool: &dyn MutexPool) {
        for mutex in &self.mutexes {
            pool.recycle_mutex(mutex.clone());
        }
    }
}

/// Lock table plus the record of whether this bridge installed the
/// backend's callback.
pub struct LockBridge {
    table: Arc<LockTable>,
    installed: AtomicBool,
}

impl LockBridge {
    /// Size the table to `count` locks from `pool`.
    pub fn new(pool: &dyn MutexPool, count: usize) -> ProviderResult<Self> {
        let table = LockTable::acquire(pool, count)?;
        tracing::debug!(count, "Acquired lock table");
        Ok(Self {
            table: Arc::new(table),
            installed: AtomicBool::new(false),
        })
    }

    pub fn table(&self) -> &LockTable {
        &self.table
    }

    /// Register the bridge as the backend's locking callback.
    ///
    /// Returns false, claiming nothing, when a callback is already present.
    pub fn install(&self, backend: &dyn CryptoBackend) -> bool {
        let table = self.table.clone();
        let callback: LockingCallback = Arc::new(move |mode, index| table.dispatch(mode, index));
        if !backend.install_locking_callback_if_unset(callback) {
            tracing::info!(backend = backend.name(), "Locking callback already installed elsewhere");
            return false;
        }
        self.installed.store(true, Ordering::Release);
        tracing::debug!(backend = backend.name(), "Installed locking callback");
        true
    }

    /// Clear the backend's callback if this bridge installed it.
    pub fn uninstall(&self, backend: &dyn CryptoBackend) -> bool {
        if !self.installed.swap(false, Ordering::AcqRel) {
            return false;
        }
        backend.set_locking_callback(None);
        tracing::debug!(backend = backend.name(), "Removed locking callback");
        true
    }

    pub fn owns_callback(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Return every mutex to `pool`.
    pub fn release(self, pool: &dyn MutexPool) {
        self.table.release(pool);
    }
}

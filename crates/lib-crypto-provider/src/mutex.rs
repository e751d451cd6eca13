//! Application-managed mutex pool.
//!
//! The backend's locking convention locks and unlocks by index from
//! separate calls, so pool mutexes expose explicit `lock`/`unlock` rather
//! than guards.

use once_cell::sync::Lazy;
use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A non-reentrant mutex with split lock/unlock.
pub trait PoolMutex: Send + Sync {
    /// Block until the mutex is held by the caller.
    fn lock(&self);

    /// Release the mutex.
    fn unlock(&self);
}

/// Source of pool mutexes.
pub trait MutexPool: Send + Sync {
    /// Hand out a fresh mutex, or `None` when the pool is exhausted.
    fn get_mutex(&self) -> Option<Arc<dyn PoolMutex>>;

    /// Return a mutex obtained from [`get_mutex`](Self::get_mutex).
    fn recycle_mutex(&self, mutex: Arc<dyn PoolMutex>);
}

/// Binary mutex over a guardless `parking_lot` raw mutex.
pub struct BinaryMutex {
    raw: RawMutex,
}

impl Default for BinaryMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryMutex {
    pub fn new() -> Self {
        Self { raw: RawMutex::INIT }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl PoolMutex for BinaryMutex {
    fn lock(&self) {
        self.raw.lock();
    }

    fn unlock(&self) {
        if !self.raw.is_locked() {
            tracing::warn!("Unlock of a pool mutex that is not held");
            return;
        }
        // SAFETY: held, checked above; the backend pairs every unlock of
        // index n with its own earlier lock of n.
        unsafe { self.raw.unlock() }
    }
}

/// Pool of [`BinaryMutex`]es with an optional cap on outstanding mutexes.
#[derive(Default)]
pub struct SystemMutexPool {
    outstanding: AtomicUsize,
    limit: Option<usize>,
}

static SYSTEM_POOL: Lazy<Arc<SystemMutexPool>> = Lazy::new(|| Arc::new(SystemMutexPool::new()));

impl SystemMutexPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool that refuses to hand out more than `limit` mutexes at once.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            limit: Some(limit),
        }
    }

    /// Process-wide pool.
    pub fn global() -> Arc<SystemMutexPool> {
        SYSTEM_POOL.clone()
    }

    /// Mutexes handed out and not yet recycled.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl MutexPool for SystemMutexPool {
    fn get_mutex(&self) -> Option<Arc<dyn PoolMutex>> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .ok()?;
        Some(Arc::new(BinaryMutex::new()))
    }

    fn recycle_mutex(&self, mutex: Arc<dyn PoolMutex>) {
        drop(mutex);
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_blocks_second_thread() {
        let mutex = Arc::new(BinaryMutex::new());
        let counter = Arc::new(AtomicUsize::new(0));
        mutex.lock();

        let handle = {
            let mutex = mutex.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                mutex.lock();
                counter.fetch_add(1, Ordering::SeqCst);
                mutex.unlock();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        mutex.unlock();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_unlock_without_lock_is_ignored() {
        let mutex = BinaryMutex::new();
        mutex.unlock();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_contended_lock_serializes_updates() {
        let mutex = Arc::new(BinaryMutex::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (mutex, inside, total) = (mutex.clone(), inside.clone(), total.clone());
                thread::spawn(move || {
                    for _ in 0..500 {
                        mutex.lock();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        total.fetch_add(1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        mutex.unlock();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(total.load(Ordering::SeqCst), 2000);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_pool_limit_and_recycle() {
        let pool = SystemMutexPool::with_limit(2);
        let a = pool.get_mutex().unwrap();
        let _b = pool.get_mutex().unwrap();
        assert!(pool.get_mutex().is_none());

        pool.recycle_mutex(a);
        assert_eq!(pool.outstanding(), 1);
        assert!(pool.get_mutex().is_some());
    }
}

//! Counting semaphore bounding in-flight extractions.
//!
//! Uses `Mutex + Condvar` from std. Permits are owned so they can travel
//! into tasks spawned on the worker pool.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A counting semaphore that limits concurrent access to a shared resource.
pub struct Semaphore {
    state: Mutex<usize>,
    cond: Condvar,
    permits: usize,
}

/// Owned permit; releases itself on drop.
pub struct Permit(Arc<Semaphore>);

impl Semaphore {
    /// Create a semaphore with `permits` initial permits.
    pub fn new(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(permits),
            cond: Condvar::new(),
            permits,
        })
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a permit is available, then acquire it.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let guard = self.lock();
        let mut count = self
            .cond
            .wait_while(guard, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        Permit(Arc::clone(self))
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        *self.lock()
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.permits - self.available()
    }

    /// Wait up to `timeout` for every permit to be released.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (count, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |count| *count < self.permits)
            .unwrap_or_else(PoisonError::into_inner);
        *count == self.permits
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut count = self.0.lock();
        *count += 1;
        // Acquirers and idle waiters share the condvar
        self.0.cond.notify_all();
    }
}

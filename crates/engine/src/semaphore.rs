//! A counted semaphore built from a mutex and a condvar.
//!
//! Used as the backup concurrency gate and as the full/empty pair of the
//! bounded session ring. `acquire` blocks while the count is zero;
//! `post` wakes one waiter.

use parking_lot::{Condvar, Mutex};

/// Counted semaphore.
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Take one permit, blocking while none are available.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take one permit without blocking. Returns `false` when none are
    /// available.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Release one permit and wake one waiter.
    pub fn post(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        // Notify under the lock so a waiter between its zero-check and
        // wait() cannot miss the wakeup.
        self.available.notify_one();
    }

    /// Current permit count.
    pub fn permits(&self) -> usize {
        *self.permits.lock()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.permits())
            .finish()
    }
}

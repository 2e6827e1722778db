use core::sync::atomic::{AtomicU32, Ordering};

use super::{wait_on_u32, wake_one_u32};

/// A counting semaphore used to park idle workers.
///
/// A `release` that happens before the matching `acquire` is remembered in
/// the count, so a sleeper is never left waiting for a wakeup that already
/// happened. Releases wake at most one sleeper each; there are no timeouts.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: AtomicU32,
    waiters: AtomicU32,
}

impl Semaphore {
    /// Creates a semaphore with `permits` available.
    pub const fn new(permits: u32) -> Self {
        Self { count: AtomicU32::new(permits), waiters: AtomicU32::new(0) }
    }

    /// Takes a permit if one is available.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Takes a permit, sleeping until one is released.
    pub fn acquire(&self) {
        if self.try_acquire() {
            return;
        }
        loop {
            self.waiters.fetch_add(1, Ordering::SeqCst);
            if self.try_acquire() {
                self.waiters.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            wait_on_u32(&self.count, 0);
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            if self.try_acquire() {
                return;
            }
        }
    }

    /// Returns a permit and wakes one sleeper, if any.
    pub fn release(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            wake_one_u32(&self.count);
        }
    }

    /// Permits currently available.
    pub fn available(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

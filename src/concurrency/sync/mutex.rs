use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use super::{ncpu, wait_on_u32, wake_one_u32};
use crate::error::fatal;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const SLEEPING: u32 = 2;

const ACTIVE_SPIN: u32 = 4;
const ACTIVE_SPIN_CNT: u32 = 30;
const PASSIVE_SPIN: u32 = 1;

/// A futex-backed lock word with no protected data.
///
/// # States
/// - 0: Unlocked
/// - 1: Locked, nobody sleeping
/// - 2: Locked, at least one thread may be sleeping in the kernel
///
/// `lock` first tries to grab the word outright. On failure it spins a few
/// rounds (only when more than one CPU exists), yields once, and then marks
/// the word sleeping and blocks. A thread that has slept re-acquires in the
/// sleeping state so that the eventual `unlock` still issues a wakeup.
pub struct RawMutex {
    key: AtomicU32,
}

impl RawMutex {
    /// Creates an unlocked mutex.
    pub const fn new() -> Self {
        Self { key: AtomicU32::new(UNLOCKED) }
    }

    /// Acquires the lock, blocking if necessary.
    #[inline]
    pub fn lock(&self) {
        let v = self.key.swap(LOCKED, Ordering::Acquire);
        if v == UNLOCKED {
            return;
        }
        self.lock_slow(v);
    }

    #[cold]
    fn lock_slow(&self, mut wait: u32) {
        let spin = if ncpu() > 1 { ACTIVE_SPIN } else { 0 };
        loop {
            for _ in 0..spin {
                if self.try_take(wait) {
                    return;
                }
                for _ in 0..ACTIVE_SPIN_CNT {
                    core::hint::spin_loop();
                }
            }
            for _ in 0..PASSIVE_SPIN {
                if self.try_take(wait) {
                    return;
                }
                std::thread::yield_now();
            }

            let v = self.key.swap(SLEEPING, Ordering::Acquire);
            if v == UNLOCKED {
                return;
            }
            wait = SLEEPING;
            wait_on_u32(&self.key, SLEEPING);
        }
    }

    #[inline]
    fn try_take(&self, wait: u32) -> bool {
        while self.key.load(Ordering::Relaxed) == UNLOCKED {
            if self
                .key
                .compare_exchange(UNLOCKED, wait, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Acquires the lock only if it is free.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.key
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock.
    ///
    /// Unlocking a mutex that is not locked is a fatal error.
    ///
    /// # Safety
    /// The caller must hold the lock; releasing someone else's critical
    /// section breaks whatever data the mutex guards.
    #[inline]
    pub unsafe fn unlock(&self) {
        match self.key.swap(UNLOCKED, Ordering::Release) {
            UNLOCKED => fatal("unlock of unlocked lock"),
            SLEEPING => wake_one_u32(&self.key),
            _ => {}
        }
    }

    /// Whether the lock is currently held by some thread.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.key.load(Ordering::Relaxed) != UNLOCKED
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMutex").field("locked", &self.is_locked()).finish()
    }
}

/// A mutex protecting a value, built on [`RawMutex`].
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// Safety: the lock hands out at most one `&mut T` at a time.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex holding `value`.
    pub const fn new(value: T) -> Self {
        Self { raw: RawMutex::new(), data: UnsafeCell::new(value) }
    }

    /// Consumes the mutex and returns the value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    /// Acquires the lock if it is free.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Exclusive access without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self { raw: RawMutex::new(), data: UnsafeCell::new(T::default()) }
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").field("raw", &self.raw).finish_non_exhaustive()
    }
}

/// RAII guard for [`Mutex`]; unlocks on drop.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Safety: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves the lock is held, and `&mut self` is unique.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Safety: this guard acquired the lock.
        unsafe { self.mutex.raw.unlock() }
    }
}

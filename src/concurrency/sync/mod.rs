//! Blocking primitives built directly on the OS wait-on-address facility.
//!
//! - [`RawMutex`] / [`Mutex`]: spin, yield, then sleep in the kernel.
//! - [`Note`]: a one-shot sleep/wakeup event.
//! - [`Semaphore`]: a counting semaphore whose releases are never lost.
//!
//! Linux uses `futex(2)`, Windows uses `WaitOnAddress`; other platforms fall
//! back to yielding until the watched word changes.

pub mod mutex;
pub mod note;
pub mod semaphore;

#[cfg(test)]
mod tests;

pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use note::Note;
pub use semaphore::Semaphore;

use core::sync::atomic::AtomicU32;
#[cfg(not(any(windows, target_os = "linux")))]
use core::sync::atomic::Ordering;
use std::sync::OnceLock;

#[cfg(windows)]
use windows_sys::Win32::System::Threading::{WaitOnAddress, WakeByAddressAll, WakeByAddressSingle};

#[cfg(target_os = "linux")]
use libc::{SYS_futex, FUTEX_PRIVATE_FLAG, FUTEX_WAIT, FUTEX_WAKE};

#[cfg(target_os = "linux")]
#[inline]
fn futex_wait(addr: *const u32, expected: u32) {
    // Safety: `addr` comes from a live `AtomicU32`; the kernel only reads it.
    unsafe {
        libc::syscall(
            SYS_futex,
            addr,
            FUTEX_WAIT | FUTEX_PRIVATE_FLAG,
            expected,
            core::ptr::null::<libc::timespec>(),
        );
    }
}

#[cfg(target_os = "linux")]
#[inline]
fn futex_wake(addr: *const u32, count: i32) {
    // Safety: as above.
    unsafe {
        libc::syscall(SYS_futex, addr, FUTEX_WAKE | FUTEX_PRIVATE_FLAG, count);
    }
}

/// Sleeps while `*addr == expected`. May return spuriously; callers re-check.
#[inline]
pub fn wait_on_u32(addr: &AtomicU32, expected: u32) {
    #[cfg(target_os = "linux")]
    futex_wait(addr.as_ptr(), expected);

    #[cfg(windows)]
    // Safety: both pointers are valid for four bytes.
    unsafe {
        let expected_ptr = &expected as *const u32 as *const _;
        WaitOnAddress(addr.as_ptr() as *const _, expected_ptr, core::mem::size_of::<u32>(), u32::MAX);
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    while addr.load(Ordering::SeqCst) == expected {
        std::thread::yield_now();
    }
}

/// Wakes one thread sleeping on `addr`.
#[inline]
pub fn wake_one_u32(addr: &AtomicU32) {
    #[cfg(target_os = "linux")]
    futex_wake(addr.as_ptr(), 1);

    #[cfg(windows)]
    // Safety: `addr` is a live atomic.
    unsafe {
        WakeByAddressSingle(addr.as_ptr() as *const _);
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    let _ = addr;
}

/// Wakes every thread sleeping on `addr`.
#[inline]
pub fn wake_all_u32(addr: &AtomicU32) {
    #[cfg(target_os = "linux")]
    futex_wake(addr.as_ptr(), i32::MAX);

    #[cfg(windows)]
    // Safety: `addr` is a live atomic.
    unsafe {
        WakeByAddressAll(addr.as_ptr() as *const _);
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    let _ = addr;
}

/// Number of CPUs, queried once.
pub(crate) fn ncpu() -> usize {
    static NCPU: OnceLock<usize> = OnceLock::new();
    *NCPU.get_or_init(|| std::thread::available_parallelism().map_or(1, usize::from))
}

//! The operating-system page layer.
//!
//! The heap reserves its whole arena once, commits memory as it grows, and
//! tells the OS about free pages it no longer needs. [`PageSource`] is the
//! seam; [`OsPages`] is the real implementation over mmap or `VirtualAlloc`.

use core::ptr::NonNull;

use super::syscall::{commit_region, release_region, reserve_region, unused_region, used_region};

/// A provider of virtual memory for a heap arena.
///
/// Implementations only ever see page-aligned ranges inside a region they
/// returned from [`reserve`](Self::reserve).
pub trait PageSource: Send + Sync {
    /// Reserves `bytes` of address space without backing it.
    fn reserve(&self, bytes: usize) -> Option<NonNull<u8>>;

    /// Backs a reserved range with readable, writable memory.
    ///
    /// # Safety
    /// The range must lie inside a reservation from this source.
    unsafe fn commit(&self, addr: *mut u8, bytes: usize) -> bool;

    /// Tells the OS the contents of a committed range are no longer needed.
    ///
    /// # Safety
    /// The range must be committed and hold nothing the caller still needs.
    unsafe fn unused(&self, addr: *mut u8, bytes: usize);

    /// Prepares a range passed to [`unused`](Self::unused) for reuse.
    ///
    /// # Safety
    /// The range must have been committed by this source.
    unsafe fn used(&self, addr: *mut u8, bytes: usize) -> bool;

    /// Gives a whole reservation back.
    ///
    /// # Safety
    /// `addr` and `bytes` must be exactly what `reserve` returned and asked
    /// for, and nothing may reference the range afterwards.
    unsafe fn release(&self, addr: *mut u8, bytes: usize);
}

/// Pages straight from the operating system.
#[derive(Default, Clone, Copy, Debug)]
pub struct OsPages;

impl PageSource for OsPages {
    fn reserve(&self, bytes: usize) -> Option<NonNull<u8>> {
        // Safety: a fresh anonymous reservation aliases nothing.
        unsafe { reserve_region(bytes) }
    }

    unsafe fn commit(&self, addr: *mut u8, bytes: usize) -> bool {
        commit_region(addr, bytes)
    }

    unsafe fn unused(&self, addr: *mut u8, bytes: usize) {
        unused_region(addr, bytes);
    }

    unsafe fn used(&self, addr: *mut u8, bytes: usize) -> bool {
        used_region(addr, bytes)
    }

    unsafe fn release(&self, addr: *mut u8, bytes: usize) {
        release_region(addr, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PAGE_SIZE;

    #[test]
    fn reserve_commit_release() {
        let pages = OsPages;
        let bytes = 16 * PAGE_SIZE;
        let base = pages.reserve(bytes).unwrap();
        unsafe {
            assert!(pages.commit(base.as_ptr(), 4 * PAGE_SIZE));
            base.as_ptr().write_bytes(0xAB, 4 * PAGE_SIZE);
            pages.unused(base.as_ptr(), 4 * PAGE_SIZE);
            assert!(pages.used(base.as_ptr(), 4 * PAGE_SIZE));
            base.as_ptr().write(1);
            assert_eq!(*base.as_ptr(), 1);
            pages.release(base.as_ptr(), bytes);
        }
    }
}

use core::ptr::{self, NonNull};

use libc::{
    c_void, madvise, mmap, mprotect, munmap, MADV_DONTNEED, MAP_ANONYMOUS, MAP_FAILED,
    MAP_NORESERVE, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE,
};

/// Reserves `size` bytes of address space with no access rights.
pub(crate) unsafe fn reserve_region(size: usize) -> Option<NonNull<u8>> {
    let ptr = mmap(
        ptr::null_mut(),
        size,
        PROT_NONE,
        MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
        -1,
        0,
    );
    if ptr == MAP_FAILED {
        None
    } else {
        NonNull::new(ptr.cast())
    }
}

/// Makes a reserved range readable and writable.
pub(crate) unsafe fn commit_region(ptr: *mut u8, size: usize) -> bool {
    mprotect(ptr.cast::<c_void>(), size, PROT_READ | PROT_WRITE) == 0
}

/// Drops the physical pages behind a range; it reads back as zeros.
pub(crate) unsafe fn unused_region(ptr: *mut u8, size: usize) {
    madvise(ptr.cast::<c_void>(), size, MADV_DONTNEED);
}

/// Undoes [`unused_region`]. Pages fault back in on touch, so nothing to do.
pub(crate) unsafe fn used_region(_ptr: *mut u8, _size: usize) -> bool {
    true
}

pub(crate) unsafe fn release_region(ptr: *mut u8, size: usize) {
    munmap(ptr.cast::<c_void>(), size);
}

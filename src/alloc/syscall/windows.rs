use core::ffi::c_void;
use core::ptr::{self, NonNull};

use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS,
    PAGE_READWRITE,
};

pub(crate) unsafe fn reserve_region(size: usize) -> Option<NonNull<u8>> {
    let ptr = VirtualAlloc(ptr::null(), size, MEM_RESERVE, PAGE_NOACCESS);
    NonNull::new(ptr.cast::<u8>())
}

pub(crate) unsafe fn commit_region(ptr: *mut u8, size: usize) -> bool {
    !VirtualAlloc(ptr.cast::<c_void>(), size, MEM_COMMIT, PAGE_READWRITE).is_null()
}

pub(crate) unsafe fn unused_region(ptr: *mut u8, size: usize) {
    VirtualFree(ptr.cast::<c_void>(), size, MEM_DECOMMIT);
}

/// Decommitted pages must be committed again before they are touched.
pub(crate) unsafe fn used_region(ptr: *mut u8, size: usize) -> bool {
    commit_region(ptr, size)
}

pub(crate) unsafe fn release_region(ptr: *mut u8, _size: usize) {
    // MEM_RELEASE frees the whole reservation; size must be 0.
    VirtualFree(ptr.cast::<c_void>(), 0, MEM_RELEASE);
}

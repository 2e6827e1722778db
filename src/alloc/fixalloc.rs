//! Fixed-size block allocator for heap metadata.
//!
//! Span descriptors and cache records are allocated from here rather than
//! from the heap they describe. Blocks come off a free list when one is
//! available, otherwise they are carved from the current chunk; chunks are
//! obtained from the system allocator and only returned when the
//! `FixAlloc` itself is dropped.

use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};
use std::alloc::{alloc, dealloc, handle_alloc_error};

use crate::error::fatal;

struct Link {
    next: *mut Link,
}

/// A block handed out by [`FixAlloc::alloc`].
#[derive(Debug, Clone, Copy)]
pub struct Block<T> {
    /// Uninitialized storage for one `T`.
    pub ptr: NonNull<T>,
    /// `true` when the block was freshly carved rather than reused.
    pub fresh: bool,
}

/// A free-list allocator for `T`-sized blocks.
///
/// Not thread-safe; every call takes `&mut self`, so the owner serializes
/// access (the page heap keeps its `FixAlloc`s under the heap lock).
pub struct FixAlloc<T> {
    size: usize,
    align: usize,
    chunk_bytes: usize,
    list: *mut Link,
    chunk: *mut u8,
    nchunk: usize,
    inuse: usize,
    chunks: Vec<NonNull<u8>>,
    _marker: PhantomData<T>,
}

// Safety: the allocator owns its chunks; blocks are raw storage.
unsafe impl<T> Send for FixAlloc<T> {}

impl<T> FixAlloc<T> {
    /// Creates an allocator that carves `chunk_bytes`-sized chunks.
    ///
    /// A chunk smaller than one block is a fatal configuration error.
    pub fn new(chunk_bytes: usize) -> Self {
        let align = mem::align_of::<T>().max(mem::align_of::<Link>());
        let size = mem::size_of::<T>().max(mem::size_of::<Link>()).next_multiple_of(align);
        if chunk_bytes < size {
            fatal("runtime: fixalloc chunk smaller than object size");
        }
        Self {
            size,
            align,
            chunk_bytes,
            list: ptr::null_mut(),
            chunk: ptr::null_mut(),
            nchunk: 0,
            inuse: 0,
            chunks: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Returns a block of uninitialized storage.
    pub fn alloc(&mut self) -> Block<T> {
        if let Some(head) = NonNull::new(self.list) {
            // Safety: every block on the list was written as a `Link` by `free`.
            self.list = unsafe { head.as_ref().next };
            self.inuse += self.size;
            return Block { ptr: head.cast(), fresh: false };
        }

        if self.nchunk < self.size {
            self.refill();
        }

        // Safety: `chunk` points at `nchunk >= size` unused bytes.
        let block = unsafe { NonNull::new_unchecked(self.chunk) };
        self.chunk = unsafe { self.chunk.add(self.size) };
        self.nchunk -= self.size;
        self.inuse += self.size;
        Block { ptr: block.cast(), fresh: true }
    }

    #[cold]
    fn refill(&mut self) {
        let layout = match Layout::from_size_align(self.chunk_bytes, self.align) {
            Ok(layout) => layout,
            Err(_) => fatal("runtime: invalid fixalloc chunk layout"),
        };
        // Safety: `layout` has non-zero size.
        let raw = unsafe { alloc(layout) };
        let Some(chunk) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        self.chunks.push(chunk);
        self.chunk = chunk.as_ptr();
        self.nchunk = self.chunk_bytes;
    }

    /// Returns a block to the free list.
    ///
    /// # Safety
    /// `block` must come from this allocator's `alloc` and must not be used
    /// afterwards. Any `T` stored in it is not dropped.
    pub unsafe fn free(&mut self, block: NonNull<T>) {
        self.inuse -= self.size;
        let link = block.cast::<Link>().as_ptr();
        (*link).next = self.list;
        self.list = link;
    }

    /// Bytes handed out and not yet freed.
    pub fn inuse(&self) -> usize {
        self.inuse
    }

    /// Bytes obtained from the system allocator.
    pub fn sys_bytes(&self) -> usize {
        self.chunks.len() * self.chunk_bytes
    }

    /// Size of one block, after rounding for alignment.
    pub fn block_size(&self) -> usize {
        self.size
    }
}

impl<T> Drop for FixAlloc<T> {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.chunk_bytes, self.align) {
            for chunk in self.chunks.drain(..) {
                // Safety: each chunk was allocated with exactly this layout.
                unsafe { dealloc(chunk.as_ptr(), layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Record {
        a: u64,
        b: [u32; 5],
    }

    #[test]
    fn reuses_freed_blocks_before_carving() {
        let mut fa: FixAlloc<Record> = FixAlloc::new(4096);
        let first = fa.alloc();
        assert!(first.fresh);
        let second = fa.alloc();
        assert_eq!(fa.inuse(), 2 * fa.block_size());

        unsafe { fa.free(first.ptr) };
        let again = fa.alloc();
        assert!(!again.fresh);
        assert_eq!(again.ptr, first.ptr);
        assert_ne!(again.ptr, second.ptr);
    }

    #[test]
    fn spills_into_new_chunks() {
        let mut fa: FixAlloc<Record> = FixAlloc::new(256);
        let per_chunk = 256 / fa.block_size();
        for _ in 0..per_chunk * 3 {
            let block = fa.alloc();
            unsafe { block.ptr.as_ptr().write(Record { a: 1, b: [2; 5] }) };
        }
        assert_eq!(fa.sys_bytes(), 3 * 256);
    }

    #[test]
    #[should_panic(expected = "fixalloc chunk smaller than object size")]
    fn chunk_smaller_than_block_is_fatal() {
        let _fa: FixAlloc<[u64; 64]> = FixAlloc::new(128);
    }
}

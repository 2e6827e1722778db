/// log2 of the heap page size.
pub const PAGE_SHIFT: usize = 13;

/// The heap page size (8KB). Spans are measured in these pages.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Mask selecting the offset within a heap page.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Largest request served from a size class; anything bigger gets its own span.
pub const MAX_SMALL_SIZE: usize = 32 << 10;

/// Number of size classes, including class 0 for large objects.
pub const NUM_SIZE_CLASSES: usize = 67;

/// Free and busy lists are indexed by page count below this bound.
pub const MAX_MHEAP_LIST: usize = 1 << (20 - PAGE_SHIFT);

/// Heap growth is rounded up to this many bytes.
pub const HEAP_GROW_ALIGN: usize = 64 << 10;

/// Default minimum heap growth.
pub const HEAP_ALLOC_CHUNK: usize = 1 << 20;

/// Default chunk size for the fixed-block metadata allocator.
pub const FIX_ALLOC_CHUNK: usize = 16 << 10;

/// Bytes per work buffer, header included.
pub const WORKBUF_SIZE: usize = 2048;

/// Default number of addresses held by one work buffer.
pub const WORKBUF_CAPACITY: usize = (WORKBUF_SIZE - 3 * core::mem::size_of::<usize>()) / core::mem::size_of::<usize>();

/// Default virtual reservation for a heap arena (256MB).
pub const ARENA_RESERVE_SIZE: usize = 256 << 20;

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + (align - 1)) & !(align - 1)
}

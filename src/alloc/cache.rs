//! Per-thread caches.
//!
//! A [`ThreadCache`] holds at most one span per size class and allocates
//! from it without locks. When a span runs dry the cache hands it back to the
//! central list and takes a new one. Large requests bypass the cache and get
//! a span of their own from the page heap.

use core::cell::Cell;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use super::heap::Heap;
use super::span::{FreeObject, SpanRef};
use crate::constants::{MAX_SMALL_SIZE, NUM_SIZE_CLASSES, PAGE_SHIFT, PAGE_SIZE};
use crate::error::{fatal, HeapError};
use crate::stats::HeapStats;

/// Storage behind a [`ThreadCache`], carved from the heap's metadata allocator.
pub(crate) struct CacheRecord {
    alloc: [Option<SpanRef>; NUM_SIZE_CLASSES],
}

/// A per-thread allocation cache borrowed from a [`Heap`].
///
/// Move it to the thread that allocates with it; it cannot be shared.
/// Dropping it returns every cached span to the central lists.
pub struct ThreadCache<'h> {
    heap: &'h Heap,
    record: NonNull<CacheRecord>,
    _not_sync: PhantomData<Cell<()>>,
}

// Safety: the record is owned exclusively by this handle and the heap is Sync.
unsafe impl Send for ThreadCache<'_> {}

impl Heap {
    /// Creates a thread cache allocating from this heap.
    pub fn thread_cache(&self) -> ThreadCache<'_> {
        let block = self.lock().cache_alloc.alloc();
        let record = block.ptr;
        // Safety: fresh or recycled block, not yet shared.
        unsafe { record.as_ptr().write(CacheRecord { alloc: [None; NUM_SIZE_CLASSES] }) };
        ThreadCache { heap: self, record, _not_sync: PhantomData }
    }
}

impl<'h> ThreadCache<'h> {
    /// The heap this cache allocates from.
    pub fn heap(&self) -> &'h Heap {
        self.heap
    }

    #[inline]
    fn record(&mut self) -> &mut CacheRecord {
        // Safety: the record belongs to this handle and `&mut self` is unique.
        unsafe { self.record.as_mut() }
    }

    /// The span currently cached for `class`, if any.
    pub fn cached_span(&self, class: usize) -> Option<SpanRef> {
        // Safety: shared read of our own record.
        unsafe { self.record.as_ref().alloc[class] }
    }

    /// Allocates `size` bytes.
    ///
    /// Small sizes are rounded up to their size class; anything above
    /// [`MAX_SMALL_SIZE`] gets a page-rounded span of its own. Objects from a
    /// recycled span are zeroed; fresh memory already is.
    ///
    /// # Errors
    /// Returns [`HeapError::OutOfMemory`] when the arena is exhausted.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        if size > MAX_SMALL_SIZE {
            return self.allocate_large(size);
        }

        let class = self.heap.classes.class_of(size);
        let cached = self.record().alloc[class];
        let s = match cached {
            // Safety: cached spans are ours to read.
            Some(s) if !unsafe { s.freelist() }.is_null() => s,
            _ => self.refill(class)?,
        };

        // Safety: `s` is cached here, so we are the only thread using its
        // free list, and the head object lies inside the span.
        let obj = unsafe {
            let obj = s.freelist();
            s.set_freelist((*obj).next);
            s.set_allocated(s.allocated() + 1);
            if s.needzero() {
                ptr::write_bytes(obj.cast::<u8>(), 0, s.elem_size());
            } else {
                (*obj).next = ptr::null_mut();
            }
            obj as usize
        };

        if self.heap.is_marking() {
            self.heap.mark_bits.set(obj);
        }
        // Safety: object addresses are inside the arena and never null.
        Ok(unsafe { NonNull::new_unchecked(obj as *mut u8) })
    }

    fn allocate_large(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let npages = size
            .checked_add(PAGE_SIZE - 1)
            .map(|bytes| bytes >> PAGE_SHIFT)
            .ok_or(HeapError::OutOfMemory { requested: size })?;
        let s = self.heap.alloc_span(npages, 0, true, true)?;
        s.set_limit(s.base() + size);
        HeapStats::bump(&self.heap.stats.large_allocs);
        if self.heap.is_marking() {
            self.heap.mark_bits.set(s.base());
        }
        // Safety: span bases are inside the arena and never null.
        Ok(unsafe { NonNull::new_unchecked(s.base() as *mut u8) })
    }

    /// Swaps the exhausted span of `class` for one with free objects.
    ///
    /// Refilling while the cached span still has free objects is fatal.
    /// Callers take an object from the new span straight away, since a cached
    /// span with nothing allocated cannot be handed back to its central list.
    pub(crate) fn refill(&mut self, class: usize) -> Result<SpanRef, HeapError> {
        let heap = self.heap;
        if let Some(old) = self.record().alloc[class].take() {
            // Safety: the span is cached here.
            if !unsafe { old.freelist() }.is_null() {
                fatal("MCache_Refill - refill on a nonempty span");
            }
            heap.central(class).uncache_span(heap, old);
        }
        let s = heap.central(class).cache_span(heap)?;
        // Safety: `cache_span` only returns spans with free objects.
        let head: *mut FreeObject = unsafe { s.freelist() };
        if head.is_null() {
            fatal("MCache_Refill - empty span");
        }
        self.record().alloc[class] = Some(s);
        Ok(s)
    }

    /// Hands every cached span back to its central list.
    ///
    /// Must be called (or the cache dropped) before a mark phase ends.
    pub fn release_all(&mut self) {
        let heap = self.heap;
        for class in 1..NUM_SIZE_CLASSES {
            if let Some(s) = self.record().alloc[class].take() {
                heap.central(class).uncache_span(heap, s);
            }
        }
    }
}

impl Drop for ThreadCache<'_> {
    fn drop(&mut self) {
        self.release_all();
        // Safety: the record came from this heap's cache allocator and is no
        // longer referenced.
        unsafe { self.heap.lock().cache_alloc.free(self.record) };
    }
}

impl core::fmt::Debug for ThreadCache<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let cached = (1..NUM_SIZE_CLASSES).filter(|&c| self.cached_span(c).is_some()).count();
        f.debug_struct("ThreadCache").field("cached_spans", &cached).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SpanState;
    use crate::config::HeapConfig;

    fn heap() -> Heap {
        Heap::new(HeapConfig::default().with_arena_bytes(16 << 20)).unwrap()
    }

    #[test]
    fn small_objects_come_from_one_span() {
        let heap = heap();
        let mut cache = heap.thread_cache();
        let a = cache.allocate(24).unwrap().as_ptr() as usize;
        let b = cache.allocate(24).unwrap().as_ptr() as usize;
        let s = heap.lookup_span(a).unwrap();
        assert_eq!(heap.lookup_span(b), Some(s));
        assert_eq!(s.elem_size(), 32);
        assert_eq!(s.allocated(), 2);
        assert!(s.in_cache());
        assert_eq!(heap.cached_spans(), 1);
        drop(cache);
        assert!(!s.in_cache());
        assert_eq!(heap.cached_spans(), 0);
    }

    #[test]
    fn exhausting_a_span_refills() {
        let heap = heap();
        let mut cache = heap.thread_cache();
        let class = heap.size_classes().class_of(4096);
        let per_span = heap.size_classes().class(class).objects_per_span();
        let first = cache.allocate(4096).unwrap().as_ptr() as usize;
        for _ in 1..per_span {
            cache.allocate(4096).unwrap();
        }
        let next = cache.allocate(4096).unwrap().as_ptr() as usize;
        assert_ne!(heap.lookup_span(first), heap.lookup_span(next));
        assert!(!heap.lookup_span(first).unwrap().in_cache());
        assert!(heap.audit().is_ok());
    }

    #[test]
    fn large_objects_get_their_own_span() {
        let heap = heap();
        let mut cache = heap.thread_cache();
        let p = cache.allocate(MAX_SMALL_SIZE + 1).unwrap().as_ptr() as usize;
        let s = heap.lookup_span(p).unwrap();
        assert_eq!(s.size_class(), 0);
        assert_eq!(s.npages(), 5);
        assert_eq!(s.state(), SpanState::InUse);
        assert!(heap.lookup_span(p + MAX_SMALL_SIZE + 1).is_none());
        assert_eq!(heap.stats().snapshot().large_allocs, 1);
    }

    #[test]
    fn spans_refilled_by_allocate_release_cleanly() {
        let heap = heap();
        let class = heap.size_classes().class_of(64);
        let mut cache = heap.thread_cache();
        let p = cache.allocate(64).unwrap().as_ptr() as usize;
        let s = cache.cached_span(class).unwrap();
        assert_eq!(s.allocated(), 1);
        assert_eq!(heap.cached_spans(), 1);

        cache.release_all();
        assert_eq!(heap.cached_spans(), 0);
        assert!(cache.cached_span(class).is_none());
        assert_eq!(heap.lookup_span(p), Some(s));
        drop(cache);
        assert!(heap.audit().is_ok());
    }

    #[test]
    #[should_panic(expected = "refill on a nonempty span")]
    fn refill_with_free_objects_is_fatal() {
        let heap = heap();
        let mut cache = heap.thread_cache();
        cache.allocate(64).unwrap();
        let class = heap.size_classes().class_of(64);
        let _ = cache.refill(class);
    }

    #[test]
    fn objects_are_marked_while_marking() {
        let heap = heap();
        let mut cache = heap.thread_cache();
        heap.marking.store(true, core::sync::atomic::Ordering::Release);
        let p = cache.allocate(100).unwrap().as_ptr() as usize;
        assert!(heap.is_marked(p));
        heap.marking.store(false, core::sync::atomic::Ordering::Release);
    }
}

//! Central free lists, one per size class.
//!
//! A central list hands whole spans to thread caches and takes them back.
//! Spans with free objects sit on `nonempty`, exhausted ones on `empty`;
//! swept spans collect at the back of `empty`, so a scan can stop at the first
//! swept one. A span handed to a cache is unlinked from both lists.
//!
//! The central lock is never held across a call into the page heap.

use core::ptr;

use super::heap::Heap;
use super::span::{FreeObject, SpanList, SpanOwner, SpanRef};
use crate::concurrency::sync::{Mutex, MutexGuard};
use crate::error::{fatal, HeapError};
use crate::stats::HeapStats;

pub(crate) struct CentralLists {
    pub(crate) nonempty: SpanList,
    pub(crate) empty: SpanList,
}

/// The central free list of one size class.
pub struct Central {
    class: usize,
    lists: Mutex<CentralLists>,
}

impl Central {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn new(class: usize) -> Self {
        Self {
            class,
            lists: Mutex::new(CentralLists {
                nonempty: SpanList::new(SpanOwner::CentralNonempty(class as u8)),
                empty: SpanList::new(SpanOwner::CentralEmpty(class as u8)),
            }),
        }
    }

    /// Size class served by this list.
    pub fn size_class(&self) -> usize {
        self.class
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CentralLists> {
        self.lists.lock()
    }

    /// Finds a span with free objects for a cache, sweeping lazily and
    /// growing from the page heap as a last resort.
    pub(crate) fn cache_span(&self, heap: &Heap) -> Result<SpanRef, HeapError> {
        let gen = heap.sweep_gen();
        let needs_sweep = gen.wrapping_sub(2);
        let sweeping = gen.wrapping_sub(1);

        let mut lists = self.lists.lock();
        'retry: loop {
            // Safety (all list operations below): the central lock is held.
            for s in unsafe { lists.nonempty.iter() } {
                let sg = s.sweep_gen();
                if sg == sweeping {
                    continue;
                }
                if !s.cas_sweep_gen(sg, sweeping) {
                    continue;
                }
                unsafe { lists.nonempty.remove(s) };
                drop(lists);
                if sg == needs_sweep {
                    heap.sweep_span(s, true);
                }
                return Ok(self.hand_out(heap, s));
            }

            for s in unsafe { lists.empty.iter() } {
                let sg = s.sweep_gen();
                if sg == needs_sweep && s.cas_sweep_gen(sg, sweeping) {
                    unsafe { lists.empty.remove(s) };
                    drop(lists);
                    heap.sweep_span(s, true);
                    if !unsafe { s.freelist() }.is_null() {
                        return Ok(self.hand_out(heap, s));
                    }
                    // Still full after the sweep; park it with the swept ones.
                    lists = self.lists.lock();
                    unsafe { lists.empty.insert_back(s) };
                    s.set_sweep_gen(gen);
                    continue 'retry;
                }
                if sg == sweeping {
                    continue;
                }
                break;
            }
            break;
        }
        drop(lists);

        let s = self.grow(heap)?;
        Ok(self.hand_out(heap, s))
    }

    /// Publishes a detached span with free objects as owned by a cache.
    fn hand_out(&self, heap: &Heap, s: SpanRef) -> SpanRef {
        // Safety: `s` is detached and claimed by us.
        unsafe {
            if s.freelist().is_null() || s.free_count() == 0 {
                fatal("MCentral_CacheSpan - empty span");
            }
            s.set_owner(SpanOwner::Cache);
        }
        s.set_in_cache(true);
        s.set_sweep_gen(heap.sweep_gen());
        heap.cached_spans.fetch_add(1, core::sync::atomic::Ordering::AcqRel);
        HeapStats::bump(&heap.stats.small_refills);
        s
    }

    /// Takes back a span from a cache.
    pub(crate) fn uncache_span(&self, heap: &Heap, s: SpanRef) {
        let mut lists = self.lists.lock();
        if s.allocated() == 0 {
            fatal("MCentral_UncacheSpan - uncaching span with no allocated objects");
        }
        // Safety: central lock held; the cache is handing the span over.
        unsafe {
            if s.owner() != SpanOwner::Cache {
                fatal("MCentral_UncacheSpan - span not owned by a cache");
            }
            s.set_owner(SpanOwner::None);
            s.set_in_cache(false);
            if s.free_count() > 0 {
                lists.nonempty.insert(s);
            } else {
                lists.empty.insert_back(s);
            }
        }
        heap.cached_spans.fetch_sub(1, core::sync::atomic::Ordering::AcqRel);
    }

    /// Returns `n` objects, linked from `head` to `tail`, to span `s`.
    ///
    /// With `preserve` the caller has the span detached and claimed, and is
    /// responsible for publishing its generation. Otherwise the span is on one
    /// of this list's lists; it moves to `nonempty` if it was exhausted, and
    /// goes back to the page heap once no object is left. Returns whether it
    /// did.
    pub(crate) fn free_span(
        &self,
        heap: &Heap,
        s: SpanRef,
        n: usize,
        head: *mut FreeObject,
        tail: *mut FreeObject,
        preserve: bool,
    ) -> bool {
        if preserve {
            if s.in_cache() {
                fatal("MCentral_FreeSpan - freespan into cached span");
            }
            // Safety: the caller has exclusive ownership of the span.
            unsafe { Self::splice(s, n, head, tail) };
            return false;
        }

        let mut lists = self.lists.lock();
        if s.in_cache() {
            fatal("MCentral_FreeSpan - freespan into cached span");
        }
        // Safety: central lock held and the span is claimed by the caller.
        unsafe {
            let was_empty = s.freelist().is_null();
            Self::splice(s, n, head, tail);
            if was_empty && n > 0 {
                lists.empty.remove(s);
                lists.nonempty.insert(s);
            }
            // Only now may a cache pick the span up again.
            s.set_sweep_gen(heap.sweep_gen());
            if s.allocated() != 0 {
                return false;
            }
            lists.nonempty.remove(s);
            s.set_needzero(true);
            s.set_freelist(ptr::null_mut());
        }
        drop(lists);
        heap.free_span(s);
        true
    }

    unsafe fn splice(s: SpanRef, n: usize, head: *mut FreeObject, tail: *mut FreeObject) {
        if n == 0 {
            return;
        }
        if n > s.allocated() {
            fatal("MCentral_FreeSpan - freeing more objects than allocated");
        }
        (*tail).next = s.freelist();
        s.set_freelist(head);
        s.set_allocated(s.allocated() - n);
    }

    /// Allocates a fresh span and threads every object onto its free list.
    fn grow(&self, heap: &Heap) -> Result<SpanRef, HeapError> {
        let class = heap.classes.class(self.class);
        let s = heap.alloc_span(class.npages, self.class, false, true)?;
        let size = class.size;
        let n = class.objects_per_span();
        let base = s.base();
        s.set_limit(base + size * n);

        // Safety: the span is fresh and ours; every object lies in its pages.
        unsafe {
            for i in 0..n {
                let obj = (base + i * size) as *mut FreeObject;
                (*obj).next = if i + 1 < n {
                    (base + (i + 1) * size) as *mut FreeObject
                } else {
                    ptr::null_mut()
                };
            }
            s.set_freelist(base as *mut FreeObject);
        }
        Ok(s)
    }
}

impl core::fmt::Debug for Central {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Central").field("class", &self.class).finish_non_exhaustive()
    }
}

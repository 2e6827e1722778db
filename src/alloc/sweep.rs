//! Sweeping and object marks.
//!
//! A span's sweep generation says where it stands relative to the heap's
//! generation `G`: `G - 2` needs sweeping, `G - 1` is being swept by the
//! thread that won the claiming CAS, `G` is swept. `G` moves by two at the
//! end of each mark phase, which turns every swept span into an unswept one.
//!
//! Sweeping a small-object span frees every allocated object whose mark bit
//! is clear and clears the marks of the rest. A large span is freed whole
//! when its one object is unmarked.

use core::hint;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use super::heap::Heap;
use super::span::{FreeObject, SpanRef, SpanState};
use crate::constants::PAGE_SIZE;
use crate::error::fatal;
use crate::stats::HeapStats;

/// Most objects one span can hold (8-byte objects in a one-page span).
const MAX_OBJECTS: usize = PAGE_SIZE / 8;

/// One bit per object of a span.
struct ObjectSet([u64; MAX_OBJECTS / 64]);

impl ObjectSet {
    fn new() -> Self {
        Self([0; MAX_OBJECTS / 64])
    }

    /// Adds `i`; `false` if it was already there.
    fn insert(&mut self, i: usize) -> bool {
        let (word, bit) = (i / 64, 1u64 << (i % 64));
        let fresh = self.0[word] & bit == 0;
        self.0[word] |= bit;
        fresh
    }

    fn contains(&self, i: usize) -> bool {
        self.0[i / 64] & (1 << (i % 64)) != 0
    }
}

/// Collects the free-list members of a claimed span.
unsafe fn free_objects(s: SpanRef) -> ObjectSet {
    let mut set = ObjectSet::new();
    let mut link = s.freelist();
    while !link.is_null() {
        if !s.contains(link as usize) || !set.insert(s.object_index(link as usize)) {
            fatal("MSpan_Sweep - corrupt free list");
        }
        link = (*link).next;
    }
    set
}

impl Heap {
    /// Marks the object containing `addr`.
    ///
    /// Returns `true` if this call set the mark, `false` if the object was
    /// already marked or `addr` is not inside a live object.
    pub fn mark(&self, addr: usize) -> bool {
        match self.lookup_span(addr) {
            Some(s) => self.mark_bits.set(s.object_base(addr)),
            None => false,
        }
    }

    /// Whether the object containing `addr` is marked.
    pub fn is_marked(&self, addr: usize) -> bool {
        self.lookup_span(addr)
            .is_some_and(|s| self.mark_bits.is_set(s.object_base(addr)))
    }

    /// Whether every span of the current cycle has been swept.
    pub fn sweep_done(&self) -> bool {
        self.sweep_done.load(Ordering::Acquire)
    }

    /// Advances the sweep generation and queues every span for sweeping.
    pub(crate) fn start_sweep_cycle(&self) {
        let spans = self.lock().all_spans.clone();
        let gen = self.sweep_gen.load(Ordering::Acquire).wrapping_add(2);
        *self.sweep_spans.lock() = spans;
        self.sweep_next.store(0, Ordering::Release);
        self.sweep_gen.store(gen, Ordering::Release);
        self.sweep_done.store(false, Ordering::Release);
        tracing::trace!(sweep_gen = gen, "sweep cycle started");
    }

    /// Sweeps one unswept span of the current cycle.
    ///
    /// Returns the number of pages it returned to the heap, or `None` once
    /// every span has been visited.
    pub fn sweep_one(&self) -> Option<usize> {
        let gen = self.sweep_gen();
        loop {
            let index = self.sweep_next.fetch_add(1, Ordering::AcqRel);
            let next = self.sweep_spans.lock().get(index).copied();
            let Some(s) = next else {
                self.sweep_done.store(true, Ordering::Release);
                return None;
            };
            if s.state() != SpanState::InUse {
                continue;
            }
            let npages = s.npages();
            if s.sweep_gen() != gen.wrapping_sub(2) || !s.cas_sweep_gen(gen.wrapping_sub(2), gen.wrapping_sub(1)) {
                continue;
            }
            return Some(if self.sweep_span(s, false) { npages } else { 0 });
        }
    }

    /// Sweeps everything left in the cycle and waits for sweeps in flight on
    /// other threads.
    pub fn finish_sweep(&self) {
        while self.sweep_one().is_some() {}

        let gen = self.sweep_gen();
        let spans = self.sweep_spans.lock().clone();
        for s in spans {
            let backoff = Backoff::new();
            while s.state() == SpanState::InUse && s.sweep_gen() == gen.wrapping_sub(1) {
                backoff.snooze();
            }
        }
    }

    /// Sweeps a span the caller has claimed (generation `G - 1`).
    ///
    /// With `preserve` the span is detached and stays claimed; the caller
    /// publishes generation `G` when it is done with it. Otherwise the span
    /// is published here, and is returned to the heap if it ends up with no
    /// objects. Returns whether it was.
    pub(crate) fn sweep_span(&self, s: SpanRef, preserve: bool) -> bool {
        let gen = self.sweep_gen();
        if s.state() != SpanState::InUse || s.sweep_gen() != gen.wrapping_sub(1) {
            fatal("MSpan_Sweep - bad span state");
        }
        HeapStats::bump(&self.stats.spans_swept);

        let class = s.size_class();
        if class == 0 {
            // Raw page spans hold no object; their owner frees them.
            if s.allocated() == 0 || self.mark_bits.clear(s.base()) {
                s.set_sweep_gen(gen);
                return false;
            }
            self.stats.objects_freed.fetch_add(1, Ordering::Relaxed);
            s.set_allocated(0);
            // Safety: claimed; only we touch the span's plain fields.
            unsafe { s.set_needzero(true) };
            s.set_sweep_gen(gen);
            self.free_span(s);
            return true;
        }

        // Safety: the span is claimed, so neither a cache nor another sweeper
        // touches its free list or objects until we publish it.
        let (nfree, head, tail) = unsafe {
            let free = free_objects(s);
            let size = s.elem_size();
            let base = s.base();
            let mut head: *mut FreeObject = ptr::null_mut();
            let mut tail: *mut FreeObject = ptr::null_mut();
            let mut nfree = 0;
            for i in 0..s.capacity() {
                let obj = base + i * size;
                let marked = self.mark_bits.clear(obj);
                if marked || free.contains(i) {
                    continue;
                }
                let link = obj as *mut FreeObject;
                (*link).next = ptr::null_mut();
                if tail.is_null() {
                    head = link;
                } else {
                    (*tail).next = link;
                }
                tail = link;
                nfree += 1;
            }
            (nfree, head, tail)
        };

        if nfree == 0 {
            if !preserve {
                s.set_sweep_gen(gen);
            }
            return false;
        }
        self.stats.objects_freed.fetch_add(nfree as u64, Ordering::Relaxed);
        // Safety: still claimed.
        unsafe { s.set_needzero(true) };
        self.central(class).free_span(self, s, nfree, head, tail, preserve)
    }

    /// Frees objects of span `s` outside of a mark cycle, as if a sweep had
    /// found them dead.
    ///
    /// The span must not be cached by a thread cache; release the cache
    /// first. If the span has not been swept this cycle it is swept at the
    /// same time. Freeing during a mark phase, freeing a pointer that is not
    /// the start of an object of `s`, or (in debug builds) freeing an object
    /// twice is fatal. Returns whether the span went back to the page heap.
    pub fn free_via_sweep(&self, s: SpanRef, ptrs: &[NonNull<u8>]) -> bool {
        if self.is_marking() {
            fatal("free_via_sweep - free during mark phase");
        }
        if s.state() != SpanState::InUse {
            fatal("free_via_sweep - span not in use");
        }

        let gen = self.sweep_gen();
        let claimed_from = self.claim(s, gen);

        for p in ptrs {
            let addr = p.as_ptr() as usize;
            if !s.contains(addr) || s.object_base(addr) != addr {
                fatal("free_via_sweep - pointer is not an object of this span");
            }
        }

        if s.size_class() == 0 {
            if ptrs.is_empty() {
                s.set_sweep_gen(gen);
                return false;
            }
            self.stats.objects_freed.fetch_add(1, Ordering::Relaxed);
            s.set_allocated(0);
            self.mark_bits.clear(s.base());
            // Safety: claimed.
            unsafe { s.set_needzero(true) };
            s.set_sweep_gen(gen);
            self.free_span(s);
            return true;
        }

        if claimed_from == gen.wrapping_sub(2) {
            // Unswept: the listed objects die along with the unmarked ones.
            for p in ptrs {
                self.mark_bits.clear(p.as_ptr() as usize);
            }
            return self.sweep_span(s, false);
        }

        // Safety: claimed, so the free list is ours to read and extend.
        unsafe {
            let mut seen = if cfg!(debug_assertions) { Some(free_objects(s)) } else { None };
            let mut head: *mut FreeObject = ptr::null_mut();
            for p in ptrs.iter().rev() {
                if let Some(seen) = seen.as_mut() {
                    if !seen.insert(s.object_index(p.as_ptr() as usize)) {
                        fatal("free_via_sweep - double free");
                    }
                }
                let link = p.as_ptr().cast::<FreeObject>();
                (*link).next = head;
                head = link;
            }
            let tail = ptrs.last().map_or(ptr::null_mut(), |p| p.as_ptr().cast::<FreeObject>());
            if !ptrs.is_empty() {
                s.set_needzero(true);
            }
            self.stats.objects_freed.fetch_add(ptrs.len() as u64, Ordering::Relaxed);
            self.central(s.size_class()).free_span(self, s, ptrs.len(), head, tail, false)
        }
    }

    /// Claims `s` for exclusive use from generation `G` or `G - 2`, waiting
    /// out a sweep in progress. Returns the generation it was claimed from.
    fn claim(&self, s: SpanRef, gen: u32) -> u32 {
        let backoff = Backoff::new();
        loop {
            let sg = s.sweep_gen();
            if sg == gen.wrapping_sub(1) {
                backoff.snooze();
                continue;
            }
            if sg != gen && sg != gen.wrapping_sub(2) {
                fatal("free_via_sweep - bad sweep generation");
            }
            if s.cas_sweep_gen(sg, gen.wrapping_sub(1)) {
                return sg;
            }
            hint::spin_loop();
        }
    }
}

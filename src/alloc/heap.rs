//! The page heap.
//!
//! A [`Heap`] owns one contiguous arena reserved up front and committed as it
//! grows. Free pages are kept as spans on lists indexed by page count (one
//! list per count below [`MAX_MHEAP_LIST`], plus one for everything larger);
//! large objects live on matching busy lists so the reclaimer can find them.
//! Every page of every span, free or not, is recorded in a page map that is
//! written under the heap lock and read without it.
//!
//! The heap also carries the pieces shared by the tiers above it: the central
//! lists, the mark bitmap and the sweep generation.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

use super::central::Central;
use super::fixalloc::FixAlloc;
use super::mark_bits::MarkBits;
use super::page::{OsPages, PageSource};
use super::size_class::{size_classes, SizeClassTable};
use super::span::{Span, SpanList, SpanOwner, SpanRef, SpanState};
use crate::concurrency::sync::{Mutex, MutexGuard};
use crate::config::HeapConfig;
use crate::constants::{
    align_up, HEAP_GROW_ALIGN, MAX_MHEAP_LIST, NUM_SIZE_CLASSES, PAGE_SHIFT, PAGE_SIZE,
};
use crate::error::{fatal, HeapError};
use crate::stats::HeapStats;

use super::cache::CacheRecord;

/// State guarded by the heap lock.
pub(crate) struct HeapLocked {
    pub(crate) free: [SpanList; MAX_MHEAP_LIST],
    pub(crate) free_large: SpanList,
    pub(crate) busy: [SpanList; MAX_MHEAP_LIST],
    pub(crate) busy_large: SpanList,
    pub(crate) span_alloc: FixAlloc<Span>,
    pub(crate) cache_alloc: FixAlloc<CacheRecord>,
    /// Every descriptor ever carved, in carve order.
    pub(crate) all_spans: Vec<SpanRef>,
}

impl HeapLocked {
    #[allow(clippy::cast_possible_truncation)]
    fn new(fixalloc_chunk: usize) -> Self {
        Self {
            free: core::array::from_fn(|i| SpanList::new(SpanOwner::HeapFree(i as u16))),
            free_large: SpanList::new(SpanOwner::HeapFreeLarge),
            busy: core::array::from_fn(|i| SpanList::new(SpanOwner::HeapBusy(i as u16))),
            busy_large: SpanList::new(SpanOwner::HeapBusyLarge),
            span_alloc: FixAlloc::new(fixalloc_chunk),
            cache_alloc: FixAlloc::new(fixalloc_chunk),
            all_spans: Vec::new(),
        }
    }

    fn free_list(&mut self, npages: usize) -> &mut SpanList {
        if npages < MAX_MHEAP_LIST {
            &mut self.free[npages]
        } else {
            &mut self.free_large
        }
    }

    fn busy_list(&mut self, npages: usize) -> &mut SpanList {
        if npages < MAX_MHEAP_LIST {
            &mut self.busy[npages]
        } else {
            &mut self.busy_large
        }
    }

    /// The heap list named by `owner`, if it is one.
    pub(crate) fn list_for(&mut self, owner: SpanOwner) -> Option<&mut SpanList> {
        match owner {
            SpanOwner::HeapFree(n) => Some(&mut self.free[usize::from(n)]),
            SpanOwner::HeapFreeLarge => Some(&mut self.free_large),
            SpanOwner::HeapBusy(n) => Some(&mut self.busy[usize::from(n)]),
            SpanOwner::HeapBusyLarge => Some(&mut self.busy_large),
            _ => None,
        }
    }
}

/// Why a span is being put on the free lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FreeKind {
    /// Returned by its user.
    Release,
    /// The tail cut off an allocation.
    Split,
    /// Fresh memory from the OS.
    Grow,
}

/// A page heap together with its central lists, mark bitmap and sweeper.
///
/// Heaps are independent: each one reserves its own arena, and several can
/// live in one process. Threads allocate through a
/// [`ThreadCache`](super::ThreadCache) borrowed from the heap.
pub struct Heap {
    pub(crate) config: HeapConfig,
    pub(crate) classes: &'static SizeClassTable,
    pages: Box<dyn PageSource>,
    reservation: usize,
    reserved_bytes: usize,
    arena_start: usize,
    arena_end: usize,
    arena_used: AtomicUsize,
    page_map: Box<[AtomicPtr<Span>]>,
    pub(crate) locked: Mutex<HeapLocked>,
    pub(crate) central: Box<[CachePadded<Central>]>,

    pub(crate) sweep_gen: AtomicU32,
    pub(crate) sweep_done: AtomicBool,
    pub(crate) sweep_spans: Mutex<Vec<SpanRef>>,
    pub(crate) sweep_next: AtomicUsize,
    pub(crate) marking: AtomicBool,
    pub(crate) mark_bits: MarkBits,
    pub(crate) cached_spans: AtomicUsize,
    pub(crate) stats: HeapStats,
}

impl Heap {
    /// Creates a heap over memory from the operating system.
    ///
    /// # Errors
    /// Fails if the configuration is invalid or the arena cannot be reserved.
    pub fn new(config: HeapConfig) -> Result<Self, HeapError> {
        Self::with_page_source(config, Box::new(OsPages))
    }

    /// Creates a heap over a custom page source.
    ///
    /// # Errors
    /// Fails if the configuration is invalid or the arena cannot be reserved.
    pub fn with_page_source(
        config: HeapConfig,
        pages: Box<dyn PageSource>,
    ) -> Result<Self, HeapError> {
        config.validate()?;

        // One spare page so the arena can start on a heap-page boundary
        // whatever the OS page size.
        let reserved_bytes = config.arena_bytes + PAGE_SIZE;
        let reservation = pages
            .reserve(reserved_bytes)
            .ok_or(HeapError::ReserveFailed { bytes: reserved_bytes })?
            .as_ptr() as usize;
        let arena_start = align_up(reservation, PAGE_SIZE);
        let arena_end = arena_start + config.arena_bytes;

        let npages = config.arena_bytes >> PAGE_SHIFT;
        let page_map = (0..npages).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        let central = (0..NUM_SIZE_CLASSES).map(|class| CachePadded::new(Central::new(class))).collect();

        tracing::debug!(
            arena_start,
            arena_bytes = config.arena_bytes,
            "heap arena reserved"
        );

        Ok(Self {
            classes: size_classes(),
            pages,
            reservation,
            reserved_bytes,
            arena_start,
            arena_end,
            arena_used: AtomicUsize::new(arena_start),
            page_map,
            locked: Mutex::new(HeapLocked::new(config.fixalloc_chunk_bytes)),
            central,
            sweep_gen: AtomicU32::new(0),
            sweep_done: AtomicBool::new(true),
            sweep_spans: Mutex::new(Vec::new()),
            sweep_next: AtomicUsize::new(0),
            marking: AtomicBool::new(false),
            mark_bits: MarkBits::new(arena_start, config.arena_bytes),
            cached_spans: AtomicUsize::new(0),
            stats: HeapStats::default(),
            config,
        })
    }

    /// The configuration the heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Live counters.
    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    /// The size-class table.
    pub fn size_classes(&self) -> &'static SizeClassTable {
        self.classes
    }

    /// Current sweep generation.
    pub fn sweep_gen(&self) -> u32 {
        self.sweep_gen.load(Ordering::Acquire)
    }

    /// Whether a mark phase is in progress.
    pub fn is_marking(&self) -> bool {
        self.marking.load(Ordering::Acquire)
    }

    /// Start and current end of the committed arena.
    pub fn arena(&self) -> (usize, usize) {
        (self.arena_start, self.arena_used.load(Ordering::Acquire))
    }

    /// Number of spans currently held by thread caches.
    pub fn cached_spans(&self) -> usize {
        self.cached_spans.load(Ordering::Acquire)
    }

    pub(crate) fn central(&self, class: usize) -> &Central {
        &self.central[class]
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HeapLocked> {
        self.locked.lock()
    }

    #[inline]
    fn map_slot(&self, page: usize) -> Option<&AtomicPtr<Span>> {
        let index = page.checked_sub(self.arena_start >> PAGE_SHIFT)?;
        self.page_map.get(index)
    }

    fn map_pages(&self, s: SpanRef, start: usize, npages: usize) {
        for page in start..start + npages {
            if let Some(slot) = self.map_slot(page) {
                slot.store(s.as_ptr(), Ordering::Release);
            }
        }
    }

    #[inline]
    fn page_span(&self, page: usize) -> Option<SpanRef> {
        SpanRef::from_raw(self.map_slot(page)?.load(Ordering::Acquire))
    }

    /// The span covering `addr` in whatever state it is, from the page map.
    pub fn span_of(&self, addr: usize) -> Option<SpanRef> {
        if addr < self.arena_start || addr >= self.arena_used.load(Ordering::Acquire) {
            return None;
        }
        self.page_span(addr >> PAGE_SHIFT)
    }

    /// The in-use span whose object area contains `addr`.
    ///
    /// Lock-free; a pointer into an object handed out by this heap always
    /// resolves while the object is live.
    pub fn lookup_span(&self, addr: usize) -> Option<SpanRef> {
        let s = self.span_of(addr)?;
        if s.state() != SpanState::InUse || addr < s.base() || addr >= s.limit() {
            return None;
        }
        Some(s)
    }

    /// Allocates a span of `npages` pages for objects of `size_class`.
    ///
    /// `large` spans hold one object and are tracked on the busy lists so
    /// reclaim can sweep them. With `needzero` the memory is zeroed unless it
    /// is known to be fresh.
    ///
    /// # Errors
    /// Returns [`HeapError::OutOfMemory`] when the arena is exhausted.
    pub fn alloc_span(
        &self,
        npages: usize,
        size_class: usize,
        large: bool,
        needzero: bool,
    ) -> Result<SpanRef, HeapError> {
        if npages == 0 {
            fatal("MHeap_Alloc - zero pages");
        }
        if npages > self.config.arena_bytes >> PAGE_SHIFT {
            return Err(HeapError::OutOfMemory { requested: npages.saturating_mul(PAGE_SIZE) });
        }
        if !self.sweep_done.load(Ordering::Acquire) {
            self.reclaim(npages);
        }

        let s = {
            let mut h = self.lock();
            let s = self.alloc_span_locked(&mut h, npages)?;
            s.set_sweep_gen(self.sweep_gen());
            s.set_state(SpanState::InUse);
            // Safety: `s` was just taken off the free lists under the lock.
            unsafe { s.set_freelist(ptr::null_mut()) };
            s.set_size_class(size_class);
            if size_class == 0 {
                s.set_elem_size(s.bytes());
                s.set_limit(s.base() + s.bytes());
            } else {
                s.set_elem_size(self.classes.class_size(size_class));
            }
            if large {
                s.set_allocated(1);
                // Safety: heap lock held.
                unsafe { h.busy_list(npages).insert_back(s) };
            } else {
                s.set_allocated(0);
            }
            s
        };

        self.stats.pages_in_use.fetch_add(npages, Ordering::Relaxed);
        HeapStats::bump(&self.stats.spans_allocated);

        // Safety: the span is ours until it is published to a cache or caller.
        unsafe {
            if needzero && s.needzero() {
                ptr::write_bytes(s.base() as *mut u8, 0, s.bytes());
            }
            s.set_needzero(false);
        }
        Ok(s)
    }

    /// Allocates a span for a stack segment.
    ///
    /// # Errors
    /// Returns [`HeapError::OutOfMemory`] when the arena is exhausted.
    pub fn alloc_stack(&self, npages: usize) -> Result<SpanRef, HeapError> {
        let s = {
            let mut h = self.lock();
            let s = self.alloc_span_locked(&mut h, npages)?;
            s.set_state(SpanState::Stack);
            s.set_size_class(0);
            s.set_elem_size(s.bytes());
            s.set_limit(s.base() + s.bytes());
            s.set_allocated(0);
            // Safety: heap lock held; the span is ours.
            unsafe { s.set_freelist(ptr::null_mut()) };
            s
        };
        self.stats.pages_in_use.fetch_add(npages, Ordering::Relaxed);
        Ok(s)
    }

    /// Returns a stack span to the heap.
    pub fn free_stack(&self, s: SpanRef) {
        if s.state() != SpanState::Stack {
            fatal("MHeap_FreeStack - span is not a stack");
        }
        // Safety: the caller owns the stack span.
        unsafe { s.set_needzero(true) };
        let mut h = self.lock();
        self.free_span_locked(&mut h, s, FreeKind::Release, None);
    }

    /// Returns an in-use span with no live objects to the heap.
    ///
    /// The span must be at the current sweep generation and must not be on
    /// a central list or in a cache; anything else is fatal.
    pub fn free_span(&self, s: SpanRef) {
        let mut h = self.lock();
        self.free_span_locked(&mut h, s, FreeKind::Release, None);
    }

    fn alloc_span_locked(&self, h: &mut HeapLocked, npages: usize) -> Result<SpanRef, HeapError> {
        loop {
            if let Some(s) = Self::find_free(h, npages) {
                return Ok(self.take_span(h, s, npages));
            }
            self.grow(h, npages)?;
        }
    }

    fn find_free(h: &mut HeapLocked, npages: usize) -> Option<SpanRef> {
        if let Some(s) = h.free.iter().skip(npages).find_map(SpanList::first) {
            return Some(s);
        }

        // Best fit among large spans: fewest pages, then lowest address.
        let mut best: Option<SpanRef> = None;
        // Safety: heap lock held by the caller.
        for s in unsafe { h.free_large.iter() } {
            if s.npages() < npages {
                continue;
            }
            best = match best {
                Some(b) if b.npages() < s.npages() => Some(b),
                Some(b) if b.npages() == s.npages() && b.start() < s.start() => Some(b),
                _ => Some(s),
            };
        }
        best
    }

    fn take_span(&self, h: &mut HeapLocked, s: SpanRef, npages: usize) -> SpanRef {
        if s.state() != SpanState::Free {
            fatal("MHeap_AllocLocked - span not free");
        }
        if s.npages() < npages {
            fatal("MHeap_AllocLocked - bad npages");
        }
        // Safety: heap lock held; `s` is on the free list its owner tag names.
        unsafe {
            let owner = s.owner();
            match h.list_for(owner) {
                Some(list) => list.remove(s),
                None => fatal("MHeap_AllocLocked - free span not on a heap list"),
            }

            if s.npreleased() > 0 {
                if !self.pages.used(s.base() as *mut u8, s.bytes()) {
                    fatal("runtime: cannot recommit released pages");
                }
                self.stats
                    .released_bytes
                    .fetch_sub(s.npreleased() << PAGE_SHIFT, Ordering::Relaxed);
                s.set_npreleased(0);
            }

            if s.npages() > npages {
                // Trim the excess and put it back. Both halves pose as stacks
                // for the duration so the remainder does not merge back.
                let rest = self.new_span(h, s.start() + npages, s.npages() - npages);
                s.set_npages(npages);
                self.map_pages(rest, rest.start(), rest.npages());
                rest.set_needzero(s.needzero());
                s.set_state(SpanState::Stack);
                rest.set_state(SpanState::Stack);
                self.free_span_locked(h, rest, FreeKind::Split, s.unused_since());
                s.set_state(SpanState::Free);
            }
            s.set_unused_since(None);
        }
        self.map_pages(s, s.start(), npages);
        s
    }

    fn new_span(&self, h: &mut HeapLocked, start: usize, npages: usize) -> SpanRef {
        let block = h.span_alloc.alloc();
        let fresh = block.fresh;
        // Safety: the block is unreachable until we link it.
        let s = unsafe { SpanRef::init(block, start, npages) };
        if fresh {
            h.all_spans.push(s);
        }
        s
    }

    fn grow(&self, h: &mut HeapLocked, npages: usize) -> Result<(), HeapError> {
        let align = HEAP_GROW_ALIGN >> PAGE_SHIFT;
        let wanted = npages
            .checked_add(align - 1)
            .map(|n| n & !(align - 1))
            .and_then(|n| n.checked_mul(PAGE_SIZE))
            .ok_or(HeapError::OutOfMemory { requested: usize::MAX })?;
        let mut ask = wanted.max(self.config.heap_chunk_bytes);

        let base = match self.sys_alloc(ask) {
            Some(base) => base,
            None if ask > wanted => {
                ask = wanted;
                self.sys_alloc(ask).ok_or(HeapError::OutOfMemory { requested: ask })?
            }
            None => return Err(HeapError::OutOfMemory { requested: ask }),
        };

        HeapStats::bump(&self.stats.grows);
        tracing::debug!(bytes = ask, base, "heap grown");

        // Pose as an in-use span and free it so that coalescing happens.
        let s = self.new_span(h, base >> PAGE_SHIFT, ask >> PAGE_SHIFT);
        self.map_pages(s, s.start(), s.npages());
        s.set_sweep_gen(self.sweep_gen());
        s.set_state(SpanState::InUse);
        self.free_span_locked(h, s, FreeKind::Grow, None);
        Ok(())
    }

    /// Commits `bytes` more of the arena.
    fn sys_alloc(&self, bytes: usize) -> Option<usize> {
        let used = self.arena_used.load(Ordering::Acquire);
        if bytes == 0 {
            return None;
        }
        if bytes > self.arena_end - used {
            tracing::warn!(requested = bytes, remaining = self.arena_end - used, "heap arena exhausted");
            return None;
        }
        // Safety: `[used, used + bytes)` lies inside our reservation.
        if !unsafe { self.pages.commit(used as *mut u8, bytes) } {
            tracing::warn!(requested = bytes, "commit of arena pages failed");
            return None;
        }
        self.stats.sys_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.arena_used.store(used + bytes, Ordering::Release);
        Some(used)
    }

    fn free_span_locked(
        &self,
        h: &mut HeapLocked,
        s: SpanRef,
        kind: FreeKind,
        unused_since: Option<Instant>,
    ) {
        match s.state() {
            SpanState::Stack => {
                if s.allocated() != 0 {
                    fatal("MHeap_FreeSpanLocked - invalid stack free");
                }
            }
            SpanState::InUse => {
                if s.allocated() != 0 || s.sweep_gen() != self.sweep_gen() {
                    fatal("MHeap_FreeSpanLocked - invalid free");
                }
            }
            _ => fatal("MHeap_FreeSpanLocked - invalid span state"),
        }
        if kind == FreeKind::Release {
            if self.is_marking() {
                fatal("MHeap_FreeSpanLocked - span freed during mark phase");
            }
            self.mark_bits.clear_range(s.base(), s.bytes());
            self.stats.pages_in_use.fetch_sub(s.npages(), Ordering::Relaxed);
            HeapStats::bump(&self.stats.spans_freed);
        }

        // Safety: heap lock held for every list touched below.
        unsafe {
            let owner = s.owner();
            if owner != SpanOwner::None {
                match h.list_for(owner) {
                    Some(list) => list.remove(s),
                    None => fatal("MHeap_FreeSpanLocked - span still owned by a central list or cache"),
                }
            }
            s.set_state(SpanState::Free);
            s.set_unused_since(Some(unused_since.unwrap_or_else(Instant::now)));
            s.set_npreleased(0);

            let map_base = self.arena_start >> PAGE_SHIFT;
            if s.start() > map_base {
                if let Some(prev) = self.page_span(s.start() - 1) {
                    if prev.state() == SpanState::Free {
                        s.set_start(prev.start());
                        s.set_npages(s.npages() + prev.npages());
                        self.absorb(h, s, prev);
                    }
                }
            }
            if let Some(next) = self.page_span(s.start() + s.npages()) {
                if next.state() == SpanState::Free {
                    s.set_npages(s.npages() + next.npages());
                    self.absorb(h, s, next);
                }
            }

            self.map_pages(s, s.start(), s.npages());
            h.free_list(s.npages()).insert(s);
        }
    }

    /// Folds the bookkeeping of a merged neighbour into `s` and recycles it.
    unsafe fn absorb(&self, h: &mut HeapLocked, s: SpanRef, t: SpanRef) {
        s.set_npreleased(s.npreleased() + t.npreleased());
        s.set_needzero(s.needzero() | t.needzero());
        if let (Some(a), Some(b)) = (s.unused_since(), t.unused_since()) {
            // The merged span is only as idle as its most recent part.
            s.set_unused_since(Some(a.max(b)));
        }
        match h.list_for(t.owner()) {
            Some(list) => list.remove(t),
            None => fatal("MHeap_FreeSpanLocked - free neighbour not on a heap list"),
        }
        t.set_state(SpanState::Dead);
        h.span_alloc.free(NonNull::new_unchecked(t.as_ptr()));
    }

    /// Returns the pages of spans idle since before `now - age` to the OS.
    ///
    /// The spans stay on the free lists and are recommitted when reused.
    /// Returns the number of bytes released by this pass.
    pub fn scavenge_at(&self, now: Instant, age: Duration) -> usize {
        let mut released = 0;
        {
            let h = self.lock();
            for list in h.free.iter().chain(core::iter::once(&h.free_large)) {
                // Safety: heap lock held.
                for s in unsafe { list.iter() } {
                    let idle = unsafe { s.unused_since() }
                        .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
                    let npreleased = unsafe { s.npreleased() };
                    if idle > age && npreleased != s.npages() {
                        let bytes = (s.npages() - npreleased) << PAGE_SHIFT;
                        // Safety: the span is free; nobody uses its pages.
                        unsafe {
                            self.pages.unused(s.base() as *mut u8, s.bytes());
                            s.set_npreleased(s.npages());
                        }
                        released += bytes;
                    }
                }
            }
        }
        self.stats.released_bytes.fetch_add(released, Ordering::Relaxed);
        tracing::debug!(
            released,
            total_released = self.stats.released_bytes.load(Ordering::Relaxed),
            sys_bytes = self.stats.sys_bytes.load(Ordering::Relaxed),
            "scavenge pass"
        );
        released
    }

    /// [`scavenge_at`](Self::scavenge_at) with the current time.
    pub fn scavenge(&self, age: Duration) -> usize {
        self.scavenge_at(Instant::now(), age)
    }

    /// [`scavenge`](Self::scavenge) with the configured idle threshold.
    pub fn scavenge_idle(&self) -> usize {
        self.scavenge(self.config.scavenge_age())
    }

    /// Sweeps busy lists and then arbitrary spans until `npages` pages were
    /// returned to the heap or nothing is left to sweep.
    fn reclaim(&self, npages: usize) {
        for i in npages..MAX_MHEAP_LIST {
            if self.reclaim_list(Some(i), npages) != 0 {
                return;
            }
        }
        if self.reclaim_list(None, npages) != 0 {
            return;
        }

        let mut reclaimed = 0;
        for i in 0..npages.min(MAX_MHEAP_LIST) {
            reclaimed += self.reclaim_list(Some(i), npages - reclaimed);
            if reclaimed >= npages {
                return;
            }
        }

        while let Some(n) = self.sweep_one() {
            reclaimed += n;
            if reclaimed >= npages {
                break;
            }
        }
    }

    /// Sweeps unswept large spans of one busy list. `None` is the list of
    /// very large spans.
    fn reclaim_list(&self, which: Option<usize>, npages: usize) -> usize {
        let gen = self.sweep_gen();
        let mut reclaimed = 0;
        'retry: loop {
            let mut h = self.lock();
            let list = match which {
                Some(i) => &mut h.busy[i],
                None => &mut h.busy_large,
            };
            // Safety: heap lock held.
            for s in unsafe { list.iter() } {
                let sg = s.sweep_gen();
                if sg == gen.wrapping_sub(2) && s.cas_sweep_gen(sg, gen.wrapping_sub(1)) {
                    // Swept spans collect at the back.
                    unsafe {
                        list.remove(s);
                        list.insert_back(s);
                    }
                    drop(h);
                    let n = s.npages();
                    if self.sweep_span(s, false) {
                        reclaimed += n;
                    }
                    if reclaimed >= npages {
                        return reclaimed;
                    }
                    continue 'retry;
                }
                if sg == gen.wrapping_sub(1) {
                    continue;
                }
                break;
            }
            return reclaimed;
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if self.cached_spans.load(Ordering::Acquire) != 0 {
            tracing::warn!("heap dropped while caches hold spans");
        }
        // Safety: every borrow of the heap has ended; nothing points into the
        // arena any more.
        unsafe { self.pages.release(self.reservation as *mut u8, self.reserved_bytes) };
    }
}

impl core::fmt::Debug for Heap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (start, used) = self.arena();
        f.debug_struct("Heap")
            .field("arena_start", &format_args!("{start:#x}"))
            .field("arena_used", &(used - start))
            .field("sweep_gen", &self.sweep_gen())
            .field("marking", &self.is_marking())
            .finish_non_exhaustive()
    }
}

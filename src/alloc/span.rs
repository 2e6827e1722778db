//! Span descriptors and the intrusive lists that own them.
//!
//! A [`Span`] describes a run of contiguous heap pages. At any instant it is
//! owned by exactly one container: a page-heap free or busy list, a central
//! nonempty or empty list, or a cache slot. The `owner` tag records which one,
//! and the list operations refuse (fatally) to insert a span that is already
//! owned or to remove it from a list that does not own it.
//!
//! Descriptors are allocated from a `FixAlloc` and referred to through the
//! copyable [`SpanRef`] handle. Fields that other threads read without a lock
//! (page range, state, class, sweep generation) are atomics; the rest are
//! only touched by whoever owns the span or holds the lock of its list.

use core::fmt;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;

use super::fixalloc::Block;
use super::size_class::size_classes;
use crate::constants::PAGE_SHIFT;
use crate::error::fatal;

/// Lifecycle state of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpanState {
    /// On a page-heap free list.
    Free = 0,
    /// Holding objects.
    InUse = 1,
    /// Holding a stack segment.
    Stack = 2,
    /// Merged into a neighbour; the descriptor awaits reuse.
    Dead = 3,
}

impl SpanState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Free,
            1 => Self::InUse,
            2 => Self::Stack,
            _ => Self::Dead,
        }
    }
}

/// The container that currently owns a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanOwner {
    /// Detached: held by a thread that is sweeping or handing it over.
    None,
    /// Page-heap free list for spans of this many pages.
    HeapFree(u16),
    /// Page-heap free list for large spans.
    HeapFreeLarge,
    /// Page-heap busy list for large objects of this many pages.
    HeapBusy(u16),
    /// Page-heap busy list for very large objects.
    HeapBusyLarge,
    /// Central nonempty list of a size class.
    CentralNonempty(u8),
    /// Central empty list of a size class.
    CentralEmpty(u8),
    /// A per-thread cache slot.
    Cache,
}

/// Link word stored in the first bytes of a free object.
#[repr(C)]
pub(crate) struct FreeObject {
    pub(crate) next: *mut FreeObject,
}

/// A run of contiguous pages.
pub struct Span {
    next: *mut Span,
    prev: *mut Span,
    owner: SpanOwner,

    start: AtomicUsize,
    npages: AtomicUsize,
    state: AtomicU8,
    size_class: AtomicU8,
    elem_size: AtomicUsize,
    limit: AtomicUsize,
    sweep_gen: AtomicU32,
    allocated: AtomicU32,

    in_cache: AtomicBool,

    freelist: *mut FreeObject,
    needzero: bool,
    unused_since: Option<Instant>,
    npreleased: usize,
}

/// Copyable handle to a [`Span`] descriptor.
///
/// Descriptors are never returned to the system while their heap lives, so a
/// handle stays dereferenceable; its contents describe whatever the span
/// currently is, which is only stable while the span is `InUse`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanRef(NonNull<Span>);

// Safety: all cross-thread access goes through atomics or happens under the
// lock that owns the span.
unsafe impl Send for SpanRef {}
unsafe impl Sync for SpanRef {}

impl fmt::Debug for SpanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("npages", &self.npages())
            .field("state", &self.state())
            .field("class", &self.size_class())
            .finish()
    }
}

macro_rules! plain_field {
    ($get:ident, $set:ident, $field:ident: $ty:ty) => {
        #[inline]
        pub(crate) unsafe fn $get(self) -> $ty {
            (*self.0.as_ptr()).$field
        }

        #[inline]
        pub(crate) unsafe fn $set(self, value: $ty) {
            (*self.0.as_ptr()).$field = value;
        }
    };
}

impl SpanRef {
    /// Initializes a descriptor block as a fresh, unowned span.
    ///
    /// # Safety
    /// `block` must come from the heap's span allocator and must not be
    /// reachable from any list.
    pub(crate) unsafe fn init(block: Block<Span>, start: usize, npages: usize) -> Self {
        let raw = block.ptr.as_ptr();
        if block.fresh {
            ptr::write(
                raw,
                Span {
                    next: ptr::null_mut(),
                    prev: ptr::null_mut(),
                    owner: SpanOwner::None,
                    start: AtomicUsize::new(start),
                    npages: AtomicUsize::new(npages),
                    state: AtomicU8::new(SpanState::Dead as u8),
                    size_class: AtomicU8::new(0),
                    elem_size: AtomicUsize::new(0),
                    limit: AtomicUsize::new(0),
                    sweep_gen: AtomicU32::new(0),
                    allocated: AtomicU32::new(0),
                    in_cache: AtomicBool::new(false),
                    freelist: ptr::null_mut(),
                    needzero: false,
                    unused_since: None,
                    npreleased: 0,
                },
            );
        } else {
            // A recycled descriptor may still be read by a racing lookup that
            // loaded it before it died, so reset the shared fields atomically.
            let span = SpanRef(block.ptr);
            (*raw).next = ptr::null_mut();
            (*raw).prev = ptr::null_mut();
            (*raw).owner = SpanOwner::None;
            span.set_start(start);
            span.set_npages(npages);
            span.set_state(SpanState::Dead);
            span.set_size_class(0);
            span.set_elem_size(0);
            span.set_limit(0);
            span.set_sweep_gen(0);
            span.set_allocated(0);
            span.set_in_cache(false);
            (*raw).freelist = ptr::null_mut();
            (*raw).needzero = false;
            (*raw).unused_since = None;
            (*raw).npreleased = 0;
        }
        SpanRef(block.ptr)
    }

    #[inline]
    pub(crate) fn as_ptr(self) -> *mut Span {
        self.0.as_ptr()
    }

    #[inline]
    pub(crate) fn from_raw(raw: *mut Span) -> Option<Self> {
        NonNull::new(raw).map(SpanRef)
    }

    #[inline]
    fn span(&self) -> &Span {
        // Safety: descriptors outlive every handle; only atomic fields are
        // read through this reference.
        unsafe { self.0.as_ref() }
    }

    /// First page id (address >> page shift).
    #[inline]
    pub fn start(self) -> usize {
        self.span().start.load(Ordering::Acquire)
    }

    /// First byte address.
    #[inline]
    pub fn base(self) -> usize {
        self.start() << PAGE_SHIFT
    }

    /// Number of pages.
    #[inline]
    pub fn npages(self) -> usize {
        self.span().npages.load(Ordering::Acquire)
    }

    /// Span length in bytes.
    #[inline]
    pub fn bytes(self) -> usize {
        self.npages() << PAGE_SHIFT
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(self) -> SpanState {
        SpanState::from_u8(self.span().state.load(Ordering::Acquire))
    }

    /// Size class; 0 for large objects and stacks.
    #[inline]
    pub fn size_class(self) -> usize {
        usize::from(self.span().size_class.load(Ordering::Relaxed))
    }

    /// Object size, or the span size for large objects.
    #[inline]
    pub fn elem_size(self) -> usize {
        self.span().elem_size.load(Ordering::Relaxed)
    }

    /// End of the object area.
    #[inline]
    pub fn limit(self) -> usize {
        self.span().limit.load(Ordering::Acquire)
    }

    /// Sweep generation.
    #[inline]
    pub fn sweep_gen(self) -> u32 {
        self.span().sweep_gen.load(Ordering::Acquire)
    }

    /// Whether a thread cache is allocating from this span.
    #[inline]
    pub fn in_cache(self) -> bool {
        self.span().in_cache.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_in_cache(self, v: bool) {
        self.span().in_cache.store(v, Ordering::Release);
    }

    /// Objects currently allocated from this span.
    #[inline]
    pub fn allocated(self) -> usize {
        self.span().allocated.load(Ordering::Relaxed) as usize
    }

    /// Number of objects the span holds.
    #[inline]
    pub fn capacity(self) -> usize {
        match self.elem_size() {
            0 => 0,
            size => self.bytes() / size,
        }
    }

    /// Whether `addr` falls inside the object area.
    #[inline]
    pub fn contains(self, addr: usize) -> bool {
        addr >= self.base() && addr < self.limit()
    }

    /// Index of the object containing `addr`.
    #[inline]
    pub fn object_index(self, addr: usize) -> usize {
        match self.size_class() {
            0 => 0,
            class => size_classes().class(class).magic.divide(addr - self.base()),
        }
    }

    /// Address of the object containing `addr`.
    #[inline]
    pub fn object_base(self, addr: usize) -> usize {
        let class = self.size_class();
        if class == 0 {
            return self.base();
        }
        let magic = &size_classes().class(class).magic;
        if magic.base_mask != 0 {
            return addr & magic.base_mask;
        }
        self.base() + magic.divide(addr - self.base()) * self.elem_size()
    }

    #[inline]
    pub(crate) fn set_start(self, v: usize) {
        self.span().start.store(v, Ordering::Release);
    }

    #[inline]
    pub(crate) fn set_npages(self, v: usize) {
        self.span().npages.store(v, Ordering::Release);
    }

    #[inline]
    pub(crate) fn set_state(self, v: SpanState) {
        self.span().state.store(v as u8, Ordering::Release);
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn set_size_class(self, v: usize) {
        self.span().size_class.store(v as u8, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_elem_size(self, v: usize) {
        self.span().elem_size.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_limit(self, v: usize) {
        self.span().limit.store(v, Ordering::Release);
    }

    #[inline]
    pub(crate) fn set_sweep_gen(self, v: u32) {
        self.span().sweep_gen.store(v, Ordering::Release);
    }

    #[inline]
    pub(crate) fn cas_sweep_gen(self, current: u32, new: u32) -> bool {
        self.span()
            .sweep_gen
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn set_allocated(self, v: usize) {
        self.span().allocated.store(v as u32, Ordering::Relaxed);
    }

    plain_field!(freelist, set_freelist, freelist: *mut FreeObject);
    plain_field!(needzero, set_needzero, needzero: bool);
    plain_field!(unused_since, set_unused_since, unused_since: Option<Instant>);
    plain_field!(npreleased, set_npreleased, npreleased: usize);
    plain_field!(owner, set_owner, owner: SpanOwner);

    /// Objects left on the free list: capacity minus allocated.
    #[inline]
    pub(crate) fn free_count(self) -> usize {
        self.capacity() - self.allocated()
    }
}

/// A doubly linked list of spans tagged with its identity.
pub(crate) struct SpanList {
    first: *mut Span,
    last: *mut Span,
    id: SpanOwner,
}

// Safety: lists are only reached through the mutex that owns them.
unsafe impl Send for SpanList {}

impl SpanList {
    pub(crate) const fn new(id: SpanOwner) -> Self {
        Self { first: ptr::null_mut(), last: ptr::null_mut(), id }
    }

    #[inline]
    pub(crate) fn id(&self) -> SpanOwner {
        self.id
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.first.is_null()
    }

    #[inline]
    pub(crate) fn first(&self) -> Option<SpanRef> {
        SpanRef::from_raw(self.first)
    }

    /// Inserts at the front.
    ///
    /// # Safety
    /// The caller holds the lock guarding this list.
    pub(crate) unsafe fn insert(&mut self, s: SpanRef) {
        self.check_unowned(s);
        let raw = s.as_ptr();
        (*raw).next = self.first;
        (*raw).prev = ptr::null_mut();
        if self.first.is_null() {
            self.last = raw;
        } else {
            (*self.first).prev = raw;
        }
        self.first = raw;
        (*raw).owner = self.id;
    }

    /// Inserts at the back.
    ///
    /// # Safety
    /// The caller holds the lock guarding this list.
    pub(crate) unsafe fn insert_back(&mut self, s: SpanRef) {
        self.check_unowned(s);
        let raw = s.as_ptr();
        (*raw).next = ptr::null_mut();
        (*raw).prev = self.last;
        if self.last.is_null() {
            self.first = raw;
        } else {
            (*self.last).next = raw;
        }
        self.last = raw;
        (*raw).owner = self.id;
    }

    /// Unlinks `s`, leaving it unowned.
    ///
    /// # Safety
    /// The caller holds the lock guarding this list.
    pub(crate) unsafe fn remove(&mut self, s: SpanRef) {
        let raw = s.as_ptr();
        if (*raw).owner != self.id {
            fatal("MSpanList_Remove: span not in this list");
        }
        if self.first == raw {
            self.first = (*raw).next;
        } else {
            (*(*raw).prev).next = (*raw).next;
        }
        if self.last == raw {
            self.last = (*raw).prev;
        } else {
            (*(*raw).next).prev = (*raw).prev;
        }
        (*raw).next = ptr::null_mut();
        (*raw).prev = ptr::null_mut();
        (*raw).owner = SpanOwner::None;
    }

    unsafe fn check_unowned(&self, s: SpanRef) {
        let raw = s.as_ptr();
        if (*raw).owner != SpanOwner::None || !(*raw).next.is_null() || !(*raw).prev.is_null() {
            fatal("MSpanList_Insert: span already in a list");
        }
    }

    /// Walks the list front to back.
    ///
    /// # Safety
    /// The caller holds the lock and does not unlink the span it was just
    /// handed before advancing (use `next_of` to advance manually for that).
    pub(crate) unsafe fn iter(&self) -> SpanIter {
        SpanIter { cur: self.first }
    }

    /// The successor of `s` in whatever list owns it.
    ///
    /// # Safety
    /// The caller holds the lock of the owning list.
    #[inline]
    pub(crate) unsafe fn next_of(s: SpanRef) -> Option<SpanRef> {
        SpanRef::from_raw((*s.as_ptr()).next)
    }
}

pub(crate) struct SpanIter {
    cur: *mut Span,
}

impl Iterator for SpanIter {
    type Item = SpanRef;

    fn next(&mut self) -> Option<SpanRef> {
        let s = SpanRef::from_raw(self.cur)?;
        // Safety: established by `SpanList::iter`.
        self.cur = unsafe { (*self.cur).next };
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::fixalloc::FixAlloc;

    fn spans(n: usize) -> (FixAlloc<Span>, Vec<SpanRef>) {
        let mut fa = FixAlloc::new(4096);
        let spans = (0..n).map(|i| unsafe { SpanRef::init(fa.alloc(), i, 1) }).collect();
        (fa, spans)
    }

    #[test]
    fn insert_front_and_back() {
        let (_fa, s) = spans(3);
        let mut list = SpanList::new(SpanOwner::HeapFree(1));
        unsafe {
            list.insert(s[1]);
            list.insert(s[0]);
            list.insert_back(s[2]);
            let order: Vec<_> = list.iter().collect();
            assert_eq!(order, vec![s[0], s[1], s[2]]);
            assert_eq!(s[2].owner(), SpanOwner::HeapFree(1));

            list.remove(s[1]);
            assert_eq!(s[1].owner(), SpanOwner::None);
            let order: Vec<_> = list.iter().collect();
            assert_eq!(order, vec![s[0], s[2]]);
            list.remove(s[0]);
            list.remove(s[2]);
        }
        assert!(list.is_empty());
    }

    #[test]
    #[should_panic(expected = "span already in a list")]
    fn double_insert_is_fatal() {
        let (_fa, s) = spans(1);
        let mut a = SpanList::new(SpanOwner::CentralEmpty(3));
        let mut b = SpanList::new(SpanOwner::CentralNonempty(3));
        unsafe {
            a.insert(s[0]);
            b.insert(s[0]);
        }
    }

    #[test]
    #[should_panic(expected = "span not in this list")]
    fn remove_from_wrong_list_is_fatal() {
        let (_fa, s) = spans(1);
        let mut a = SpanList::new(SpanOwner::HeapBusyLarge);
        let mut b = SpanList::new(SpanOwner::HeapFreeLarge);
        unsafe {
            a.insert(s[0]);
            b.remove(s[0]);
        }
    }

    #[test]
    fn object_math_uses_class_magic() {
        let (_fa, s) = spans(1);
        let span = s[0];
        let class = size_classes().class_of(48);
        span.set_start(0x10_0000 >> PAGE_SHIFT);
        span.set_size_class(class);
        span.set_elem_size(48);
        span.set_limit(span.base() + 48 * 170);
        let addr = span.base() + 48 * 7 + 13;
        assert_eq!(span.object_index(addr), 7);
        assert_eq!(span.object_base(addr), span.base() + 48 * 7);
        assert!(span.contains(addr));
    }
}

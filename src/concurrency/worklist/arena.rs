//! Append-only node storage for the lock-free stack.
//!
//! Nodes are addressed by a dense `u32` index and never move or get freed
//! while the arena lives, so a thread holding a stale index can always read
//! the node's atomics safely. Storage is split into segments whose sizes
//! double (16, 32, 64, ...), which lets the arena grow without a lock and
//! without relocating existing nodes.

use core::cell::UnsafeCell;
use core::ptr;

use crate::concurrency::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
use crate::error::fatal;

const BASE_SHIFT: u32 = 4;
const BASE: usize = 1 << BASE_SHIFT;
const SEGMENTS: usize = 27;

/// Largest number of nodes an arena can hold.
pub const MAX_NODES: u32 = (BASE * ((1 << SEGMENTS) - 1)) as u32;

/// Handle to a node inside a [`NodeArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Dense index of the node.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// A stack node: link word, push counter and payload.
pub struct LfNode<T> {
    pub(crate) next: AtomicU64,
    pub(crate) push_count: AtomicU32,
    value: UnsafeCell<T>,
}

impl<T: Default> Default for LfNode<T> {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(0),
            push_count: AtomicU32::new(0),
            value: UnsafeCell::new(T::default()),
        }
    }
}

/// Segmented, grow-only storage of [`LfNode`]s.
pub struct NodeArena<T> {
    segments: [AtomicPtr<LfNode<T>>; SEGMENTS],
    len: AtomicU32,
}

// Safety: payloads are only touched through `value`/`value_mut`, whose
// contracts require the caller to own the node exclusively.
unsafe impl<T: Send> Send for NodeArena<T> {}
unsafe impl<T: Send> Sync for NodeArena<T> {}

#[inline]
const fn segment_len(segment: usize) -> usize {
    BASE << segment
}

#[inline]
fn locate(index: u32) -> (usize, usize) {
    let i = index as usize + BASE;
    let segment = (usize::BITS - 1 - i.leading_zeros() - BASE_SHIFT) as usize;
    (segment, i - segment_len(segment))
}

impl<T: Default> NodeArena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            segments: core::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            len: AtomicU32::new(0),
        }
    }

    /// Appends a node holding `value` and returns its handle.
    ///
    /// The new node is owned by the caller until it is pushed somewhere.
    pub fn alloc(&self, value: T) -> NodeId {
        let index = self.len.fetch_add(1, Ordering::AcqRel);
        if index >= MAX_NODES {
            fatal("lock-free node arena exhausted");
        }
        let (segment, offset) = locate(index);
        let base = self.segment(segment);
        // Safety: `offset < segment_len(segment)` by construction of `locate`,
        // and nobody else knows `index` yet.
        unsafe {
            *(*base.add(offset)).value.get() = value;
        }
        NodeId(index)
    }

    fn segment(&self, segment: usize) -> *mut LfNode<T> {
        let slot = &self.segments[segment];
        let current = slot.load(Ordering::Acquire);
        if !current.is_null() {
            return current;
        }

        let fresh: Box<[LfNode<T>]> = (0..segment_len(segment)).map(|_| LfNode::default()).collect();
        let raw = Box::into_raw(fresh).cast::<LfNode<T>>();
        match slot.compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => raw,
            Err(existing) => {
                // Safety: `raw` came from `Box::into_raw` above and was never shared.
                unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(raw, segment_len(segment)))) };
                existing
            }
        }
    }
}

impl<T> NodeArena<T> {
    /// Number of nodes handed out so far.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).min(MAX_NODES) as usize
    }

    /// Whether no node was ever allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &LfNode<T> {
        let (segment, offset) = locate(id.0);
        let base = self.segments[segment].load(Ordering::Acquire);
        if base.is_null() {
            fatal("lock-free node handle outside the arena");
        }
        // Safety: segments are never freed before the arena, and `offset` is in bounds.
        unsafe { &*base.add(offset) }
    }

    /// Shared access to a node's payload.
    ///
    /// # Safety
    /// No other thread may be mutating the payload.
    #[inline]
    pub unsafe fn value(&self, id: NodeId) -> &T {
        &*self.node(id).value.get()
    }

    /// Exclusive access to a node's payload.
    ///
    /// # Safety
    /// The caller must own the node: it was returned by `alloc` or `pop` and
    /// has not been pushed since.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn value_mut(&self, id: NodeId) -> &mut T {
        &mut *self.node(id).value.get()
    }
}

impl<T: Default> Default for NodeArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for NodeArena<T> {
    fn drop(&mut self) {
        for (segment, slot) in self.segments.iter().enumerate() {
            let base = slot.load(Ordering::Acquire);
            if !base.is_null() {
                // Safety: every non-null slot holds a boxed slice of `segment_len` nodes.
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(base, segment_len(segment))));
                }
            }
        }
    }
}

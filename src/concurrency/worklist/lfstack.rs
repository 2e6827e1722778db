//! A lock-free stack of arena nodes.
//!
//! The head is one `AtomicU64` packing `(push_count << 32) | (index + 1)`;
//! zero means empty. Every push bumps the node's own push counter, so a node
//! that is popped and pushed again while a slow thread still holds the old
//! head value produces a different word, and the slow thread's CAS fails
//! instead of installing a stale successor (ABA).

use super::arena::{NodeArena, NodeId};
use crate::concurrency::atomic::{AtomicU64, Ordering};

#[inline]
const fn pack(id: NodeId, count: u32) -> u64 {
    ((count as u64) << 32) | (id.0 as u64 + 1)
}

#[inline]
const fn unpack(word: u64) -> Option<NodeId> {
    // Truncation keeps the index half of the word.
    #[allow(clippy::cast_possible_truncation)]
    let low = word as u32;
    if low == 0 {
        None
    } else {
        Some(NodeId(low - 1))
    }
}

/// A Treiber stack over nodes of a [`NodeArena`].
///
/// The stack does not own its nodes; several stacks may share one arena and
/// pass nodes between each other. A node must be on at most one stack at a
/// time, which the owner-transfer discipline of `push`/`pop` guarantees.
pub struct LfStack {
    head: AtomicU64,
}

impl LfStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self { head: AtomicU64::new(0) }
    }

    /// Pushes `id`, giving up ownership of the node.
    #[inline]
    pub fn push<T>(&self, arena: &NodeArena<T>, id: NodeId) {
        let node = arena.node(id);
        let count = node.push_count.load(Ordering::Relaxed).wrapping_add(1);
        node.push_count.store(count, Ordering::Relaxed);
        let new = pack(id, count);

        let mut old = self.head.load(Ordering::Relaxed);
        loop {
            node.next.store(old, Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(old, new, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }

    /// Pops a node, taking ownership of it, or returns `None` if empty.
    #[inline]
    pub fn pop<T>(&self, arena: &NodeArena<T>) -> Option<NodeId> {
        loop {
            let old = self.head.load(Ordering::Acquire);
            let id = unpack(old)?;
            let next = arena.node(id).next.load(Ordering::Relaxed);
            if self
                .head
                .compare_exchange(old, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(id);
            }
        }
    }

    /// Whether the stack was empty at the moment of the load.
    #[inline]
    pub fn is_empty(&self) -> bool {
        unpack(self.head.load(Ordering::Acquire)).is_none()
    }
}

impl Default for LfStack {
    fn default() -> Self {
        Self::new()
    }
}

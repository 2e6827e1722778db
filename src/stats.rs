//! Heap counters.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Counters maintained by a heap. Updated with relaxed atomics; a snapshot is
/// consistent per field, not across fields.
#[derive(Debug, Default)]
pub struct HeapStats {
    pub(crate) sys_bytes: AtomicUsize,
    pub(crate) grows: AtomicU64,
    pub(crate) pages_in_use: AtomicUsize,
    pub(crate) released_bytes: AtomicUsize,
    pub(crate) spans_allocated: AtomicU64,
    pub(crate) spans_freed: AtomicU64,
    pub(crate) large_allocs: AtomicU64,
    pub(crate) small_refills: AtomicU64,
    pub(crate) spans_swept: AtomicU64,
    pub(crate) objects_freed: AtomicU64,
}

/// A point-in-time copy of [`HeapStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Bytes obtained from the operating system.
    pub sys_bytes: usize,
    /// Number of times the heap grew.
    pub grows: u64,
    /// Pages held by in-use and stack spans.
    pub pages_in_use: usize,
    /// Bytes of free spans currently returned to the operating system.
    pub released_bytes: usize,
    /// Spans handed out by the page heap.
    pub spans_allocated: u64,
    /// Spans returned to the page heap.
    pub spans_freed: u64,
    /// Large-object allocations.
    pub large_allocs: u64,
    /// Spans moved from a central list into a cache.
    pub small_refills: u64,
    /// Spans swept.
    pub spans_swept: u64,
    /// Objects reclaimed by sweeping.
    pub objects_freed: u64,
}

impl HeapStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sys_bytes: self.sys_bytes.load(Ordering::Relaxed),
            grows: self.grows.load(Ordering::Relaxed),
            pages_in_use: self.pages_in_use.load(Ordering::Relaxed),
            released_bytes: self.released_bytes.load(Ordering::Relaxed),
            spans_allocated: self.spans_allocated.load(Ordering::Relaxed),
            spans_freed: self.spans_freed.load(Ordering::Relaxed),
            large_allocs: self.large_allocs.load(Ordering::Relaxed),
            small_refills: self.small_refills.load(Ordering::Relaxed),
            spans_swept: self.spans_swept.load(Ordering::Relaxed),
            objects_freed: self.objects_freed.load(Ordering::Relaxed),
        }
    }
}

//! Mark-phase driver tying a [`WorkPool`] to a [`Heap`].

use core::sync::atomic::Ordering;

use serde::Serialize;

use super::gcwork::{GcWork, WorkPool};
use crate::alloc::Heap;
use crate::error::fatal;

/// Work accounting for one finished mark phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MarkReport {
    /// Addresses queued by workers.
    pub pushed: u64,
    /// Addresses taken by workers.
    pub popped: u64,
    /// Addresses still queued when the phase ended.
    pub remaining: u64,
}

impl MarkReport {
    /// Whether every queued address was either taken or is still queued.
    pub fn is_conserved(&self) -> bool {
        self.pushed == self.popped + self.remaining
    }
}

/// Runs mark phases over one heap.
///
/// ```
/// use halo_gc::{Collector, Heap, HeapConfig};
///
/// let heap = Heap::new(HeapConfig::default().with_arena_bytes(8 << 20)).unwrap();
/// let mut cache = heap.thread_cache();
/// let root = cache.allocate(48).unwrap().as_ptr() as usize;
/// drop(cache);
///
/// let collector = Collector::new(&heap);
/// collector.begin_mark_phase(1);
/// let mut work = collector.worker();
/// assert!(collector.shade(&mut work, root + 8));
/// assert_eq!(work.get(), Some(root));
/// assert_eq!(work.get(), None);
/// drop(work);
/// let report = collector.end_mark_phase();
/// assert!(report.is_conserved());
/// ```
pub struct Collector<'h> {
    heap: &'h Heap,
    pool: WorkPool,
}

impl<'h> Collector<'h> {
    /// Creates a collector with buffers sized from the heap configuration.
    pub fn new(heap: &'h Heap) -> Self {
        Self::with_pool(heap, WorkPool::new(heap.config().workbuf_capacity))
    }

    /// Creates a collector over an existing pool.
    pub fn with_pool(heap: &'h Heap, pool: WorkPool) -> Self {
        Self { heap, pool }
    }

    /// The heap being marked.
    pub fn heap(&self) -> &'h Heap {
        self.heap
    }

    /// The shared work pool.
    pub fn pool(&self) -> &WorkPool {
        &self.pool
    }

    /// Starts a mark phase run by `nproc` workers.
    ///
    /// Any sweeping left over from the previous cycle is finished first, so
    /// no span is still waiting to be swept when marks start being set.
    pub fn begin_mark_phase(&self, nproc: u32) {
        if self.heap.is_marking() {
            fatal("begin_mark_phase: already marking");
        }
        self.heap.finish_sweep();
        self.pool.reset(nproc);
        self.heap.marking.store(true, Ordering::Release);
        tracing::debug!(nproc, sweep_gen = self.heap.sweep_gen(), "mark phase started");
    }

    /// A worker handle on the pool.
    pub fn worker(&self) -> GcWork<'_> {
        self.pool.worker()
    }

    /// Marks the object containing `addr` and queues its base if the mark is
    /// new. Addresses outside any live object are ignored.
    pub fn shade(&self, work: &mut GcWork<'_>, addr: usize) -> bool {
        let Some(s) = self.heap.lookup_span(addr) else {
            return false;
        };
        let base = s.object_base(addr);
        if !self.heap.mark_bits.set(base) {
            return false;
        }
        work.put(base);
        true
    }

    /// Blocks until the workers have run out of work.
    pub fn wait_mark_done(&self) {
        self.pool.wait_done();
    }

    /// Ends the mark phase and starts a sweep cycle.
    ///
    /// Every thread cache must have released its spans and every worker must
    /// have disposed of its buffers.
    pub fn end_mark_phase(&self) -> MarkReport {
        if !self.heap.is_marking() {
            fatal("end_mark_phase: not marking");
        }
        if self.heap.cached_spans() != 0 {
            fatal("end_mark_phase: thread caches still hold spans");
        }
        if self.pool.active_workers() != 0 {
            fatal("end_mark_phase: workers still hold buffers");
        }
        let remaining = self.pool.drain();
        let report = MarkReport { pushed: self.pool.pushed(), popped: self.pool.popped(), remaining };
        self.heap.marking.store(false, Ordering::Release);
        self.heap.start_sweep_cycle();
        tracing::debug!(
            pushed = report.pushed,
            popped = report.popped,
            remaining = report.remaining,
            sweep_gen = self.heap.sweep_gen(),
            "mark phase ended"
        );
        report
    }
}

impl core::fmt::Debug for Collector<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collector")
            .field("marking", &self.heap.is_marking())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;

    fn heap() -> Heap {
        Heap::new(HeapConfig::default().with_arena_bytes(16 << 20)).unwrap()
    }

    #[test]
    fn unshaded_objects_are_swept_after_the_phase() {
        let heap = heap();
        let mut cache = heap.thread_cache();
        let keep = cache.allocate(64).unwrap().as_ptr() as usize;
        let lose = cache.allocate(64).unwrap().as_ptr() as usize;
        drop(cache);

        let collector = Collector::new(&heap);
        let gen = heap.sweep_gen();
        collector.begin_mark_phase(1);
        let mut work = collector.worker();
        assert!(collector.shade(&mut work, keep));
        assert!(!collector.shade(&mut work, keep));
        while work.get().is_some() {}
        drop(work);
        let report = collector.end_mark_phase();
        assert_eq!(report, MarkReport { pushed: 1, popped: 1, remaining: 0 });
        assert_eq!(heap.sweep_gen(), gen.wrapping_add(2));

        heap.finish_sweep();
        let s = heap.lookup_span(keep).unwrap();
        assert_eq!(s.allocated(), 1);
        assert!(!heap.is_marked(lose));
    }

    #[test]
    fn leftover_work_is_counted() {
        let heap = heap();
        let collector = Collector::with_pool(&heap, WorkPool::new(4));
        collector.begin_mark_phase(1);
        let mut work = collector.worker();
        for addr in 1..=10 {
            work.put(addr);
        }
        assert!(work.try_get().is_some());
        drop(work);
        let report = collector.end_mark_phase();
        assert_eq!(report.remaining, 9);
        assert!(report.is_conserved());
    }

    #[test]
    fn shading_outside_the_heap_is_ignored() {
        let heap = heap();
        let collector = Collector::new(&heap);
        collector.begin_mark_phase(1);
        let mut work = collector.worker();
        assert!(!collector.shade(&mut work, 0x10));
        drop(work);
        collector.end_mark_phase();
    }

    #[test]
    #[should_panic(expected = "thread caches still hold spans")]
    fn ending_with_cached_spans_is_fatal() {
        let heap = heap();
        let mut cache = heap.thread_cache();
        let collector = Collector::new(&heap);
        collector.begin_mark_phase(1);
        cache.allocate(16).unwrap();
        collector.end_mark_phase();
    }

    #[test]
    #[should_panic(expected = "already marking")]
    fn nested_phase_is_fatal() {
        let heap = heap();
        let collector = Collector::new(&heap);
        collector.begin_mark_phase(1);
        collector.begin_mark_phase(1);
    }
}

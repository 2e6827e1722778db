use std::collections::BTreeMap;
use std::ptr::NonNull;

use halo_gc::constants::{HEAP_GROW_ALIGN, PAGE_SIZE};
use halo_gc::{Heap, HeapConfig, SpanRef, SpanState};

fn heap(arena: usize) -> Heap {
    Heap::new(
        HeapConfig::default()
            .with_arena_bytes(arena)
            .with_heap_chunk_bytes(HEAP_GROW_ALIGN),
    )
    .unwrap()
}

/// Deterministic shuffle so failures reproduce.
fn shuffle<T>(items: &mut [T], mut seed: u64) {
    for i in (1..items.len()).rev() {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let j = (seed % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

fn free_all(heap: &Heap, ptrs: &[usize]) {
    let mut by_span: BTreeMap<usize, (SpanRef, Vec<NonNull<u8>>)> = BTreeMap::new();
    for &p in ptrs {
        let s = heap.lookup_span(p).expect("live object");
        by_span
            .entry(s.base())
            .or_insert_with(|| (s, Vec::new()))
            .1
            .push(NonNull::new(p as *mut u8).unwrap());
    }
    for (_, (s, objs)) in by_span {
        heap.free_via_sweep(s, &objs);
    }
}

#[test]
fn concurrent_small_allocations_recycle_without_growing() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 2500;

    let heap = heap(64 << 20);
    let mut ptrs: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let heap = &heap;
                scope.spawn(move || {
                    let mut cache = heap.thread_cache();
                    let mut mine = Vec::with_capacity(PER_THREAD);
                    for i in 0..PER_THREAD {
                        let p = cache.allocate(24).unwrap().as_ptr() as usize;
                        unsafe { (p as *mut u64).write(i as u64) };
                        mine.push(p);
                    }
                    cache.release_all();
                    mine
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let mut sorted = ptrs.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), THREADS * PER_THREAD, "objects handed out twice");
    for w in sorted.windows(2) {
        assert!(w[1] - w[0] >= 32, "objects overlap");
    }
    assert_eq!(heap.cached_spans(), 0);
    heap.audit().unwrap();

    shuffle(&mut ptrs, 0x9e37_79b9_7f4a_7c15);
    free_all(&heap, &ptrs);

    let report = heap.audit().unwrap();
    assert_eq!(report.nonempty_spans + report.empty_spans, 0);
    let grows = heap.stats().snapshot().grows;

    let mut cache = heap.thread_cache();
    for _ in 0..THREADS * PER_THREAD {
        cache.allocate(24).unwrap();
    }
    drop(cache);
    assert_eq!(heap.stats().snapshot().grows, grows);
    heap.audit().unwrap();
}

#[test]
fn split_leaves_remainder_on_free_list() {
    let heap = heap(8 << 20);
    let whole = heap.alloc_span(128, 0, false, false).unwrap();
    let base = whole.base();
    heap.free_span(whole);

    let grows = heap.stats().snapshot().grows;

    let s = heap.alloc_span(60, 0, false, false).unwrap();
    assert_eq!(s.base(), base);
    assert_eq!(s.npages(), 60);

    let rest = heap.span_of(base + 60 * PAGE_SIZE).unwrap();
    assert_eq!(rest.state(), SpanState::Free);
    assert_eq!(rest.npages(), 68);
    assert_eq!(heap.span_of(base + 127 * PAGE_SIZE), Some(rest));

    let t = heap.alloc_span(68, 0, false, false).unwrap();
    assert_eq!(t.base(), base + 60 * PAGE_SIZE);
    assert_eq!(t.npages(), 68);
    assert_eq!(t.state(), SpanState::InUse);
    assert_eq!(heap.stats().snapshot().grows, grows);

    heap.free_span(s);
    heap.free_span(t);
    let merged = heap.span_of(base).unwrap();
    assert_eq!(merged.npages(), 128);
    assert_eq!(heap.stats().snapshot().grows, grows);
    heap.audit().unwrap();
}

#[test]
fn large_objects_free_whole_spans() {
    let heap = heap(8 << 20);
    let mut cache = heap.thread_cache();
    let p = cache.allocate(100_000).unwrap();
    let s = heap.lookup_span(p.as_ptr() as usize).unwrap();
    assert_eq!(s.npages(), 13);
    assert_eq!(heap.audit().unwrap().busy_spans, 1);

    assert!(heap.free_via_sweep(s, &[p]));
    assert_eq!(heap.span_of(p.as_ptr() as usize).map(SpanRef::state), Some(SpanState::Free));
    assert_eq!(heap.audit().unwrap().busy_spans, 0);
}

#[test]
fn released_pages_are_recommitted_on_reuse() {
    let heap = heap(8 << 20);
    let s = heap.alloc_span(16, 0, false, true).unwrap();
    unsafe { std::ptr::write_bytes(s.base() as *mut u8, 0xAB, s.bytes()) };
    heap.free_span(s);
    let later = std::time::Instant::now() + std::time::Duration::from_secs(1);
    assert!(heap.scavenge_at(later, std::time::Duration::ZERO) >= 16 * PAGE_SIZE);

    let again = heap.alloc_span(16, 0, false, true).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(again.base() as *const u8, again.bytes()) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn sweep_cycle_reclaims_unmarked_objects() {
    let heap = heap(8 << 20);
    let mut cache = heap.thread_cache();
    let objs: Vec<usize> = (0..64).map(|_| cache.allocate(200).unwrap().as_ptr() as usize).collect();
    drop(cache);

    let collector = halo_gc::Collector::new(&heap);
    collector.begin_mark_phase(1);
    let mut work = collector.worker();
    for &p in objs.iter().step_by(2) {
        collector.shade(&mut work, p);
    }
    while work.get().is_some() {}
    drop(work);
    collector.end_mark_phase();

    while heap.sweep_one().is_some() {}
    assert!(heap.sweep_done());
    let live: usize = {
        let mut spans: Vec<_> = objs.iter().filter_map(|&p| heap.lookup_span(p)).collect();
        spans.sort_by_key(|s| s.base());
        spans.dedup();
        spans.iter().map(|s| s.allocated()).sum()
    };
    assert_eq!(live, 32);
    heap.audit().unwrap();
}

#[test]
fn concurrent_sweepers_and_caches_sweep_each_span_once() {
    const OBJECTS: usize = 5000;
    const SWEEPERS: usize = 2;
    const ALLOCATORS: usize = 2;
    const PER_ALLOCATOR: usize = 1000;

    let heap = heap(32 << 20);
    let mut cache = heap.thread_cache();
    let objs: Vec<usize> = (0..OBJECTS).map(|_| cache.allocate(64).unwrap().as_ptr() as usize).collect();
    drop(cache);

    let mut spans: Vec<SpanRef> = objs.iter().filter_map(|&p| heap.lookup_span(p)).collect();
    spans.sort_by_key(|s| s.base());
    spans.dedup();
    assert!(spans.len() > 10);

    let collector = halo_gc::Collector::new(&heap);
    collector.begin_mark_phase(1);
    let kept: Vec<usize> = objs.iter().copied().step_by(2).collect();
    for &p in &kept {
        assert!(heap.mark(p));
    }
    collector.end_mark_phase();
    let swept_before = heap.stats().snapshot().spans_swept;

    // Sweepers walk the cycle while caches claim spans of the same class.
    let fresh: Vec<usize> = std::thread::scope(|scope| {
        for _ in 0..SWEEPERS {
            let heap = &heap;
            scope.spawn(move || while heap.sweep_one().is_some() {});
        }
        let handles: Vec<_> = (0..ALLOCATORS)
            .map(|_| {
                let heap = &heap;
                scope.spawn(move || {
                    let mut cache = heap.thread_cache();
                    let mine: Vec<usize> =
                        (0..PER_ALLOCATOR).map(|_| cache.allocate(64).unwrap().as_ptr() as usize).collect();
                    cache.release_all();
                    mine
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });
    heap.finish_sweep();
    assert!(heap.sweep_done());

    let swept = heap.stats().snapshot().spans_swept - swept_before;
    assert_eq!(swept, spans.len() as u64, "a span was swept twice or skipped");
    for s in &spans {
        assert_eq!(s.sweep_gen(), heap.sweep_gen());
    }

    let mut live = kept.clone();
    live.extend(&fresh);
    let mut unique = live.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), kept.len() + ALLOCATORS * PER_ALLOCATOR, "a live object was handed out again");

    let mut live_spans: Vec<SpanRef> = live.iter().filter_map(|&p| heap.lookup_span(p)).collect();
    live_spans.sort_by_key(|s| s.base());
    live_spans.dedup();
    let allocated: usize = live_spans.iter().map(|s| s.allocated()).sum();
    assert_eq!(allocated, live.len());

    assert_eq!(heap.cached_spans(), 0);
    heap.audit().unwrap();
}

use std::ptr::NonNull;

use halo_gc::constants::HEAP_GROW_ALIGN;
use halo_gc::{Heap, HeapConfig, SpanRef};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    AllocLarge(usize),
    Free(usize),
    Span(usize),
    FreeSpan(usize),
    Release,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1usize..4096).prop_map(Op::Alloc),
        1 => (32_769usize..200_000).prop_map(Op::AllocLarge),
        3 => any::<usize>().prop_map(Op::Free),
        1 => (1usize..40).prop_map(Op::Span),
        1 => any::<usize>().prop_map(Op::FreeSpan),
        1 => Just(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_span_lives_in_exactly_one_place(ops in proptest::collection::vec(op(), 1..120)) {
        let heap = Heap::new(
            HeapConfig::default()
                .with_arena_bytes(128 << 20)
                .with_heap_chunk_bytes(HEAP_GROW_ALIGN),
        )
        .unwrap();
        let mut cache = heap.thread_cache();
        let mut objects: Vec<NonNull<u8>> = Vec::new();
        let mut spans: Vec<SpanRef> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(size) => objects.push(cache.allocate(size).unwrap()),
                Op::AllocLarge(size) => objects.push(cache.allocate(size).unwrap()),
                Op::Free(i) if !objects.is_empty() => {
                    let p = objects.swap_remove(i % objects.len());
                    let s = heap.lookup_span(p.as_ptr() as usize).unwrap();
                    if s.in_cache() {
                        cache.release_all();
                    }
                    heap.free_via_sweep(s, &[p]);
                }
                Op::Span(npages) => spans.push(heap.alloc_span(npages, 0, false, true).unwrap()),
                Op::FreeSpan(i) if !spans.is_empty() => {
                    heap.free_span(spans.swap_remove(i % spans.len()));
                }
                Op::Release => cache.release_all(),
                _ => {}
            }
            let report = heap.audit();
            prop_assert!(report.is_ok(), "{}", report.unwrap_err());
            let report = report.unwrap();
            prop_assert_eq!(report.detached_spans, spans.len());
        }

        drop(cache);
        for s in spans.drain(..) {
            heap.free_span(s);
        }
        for p in objects.drain(..) {
            let s = heap.lookup_span(p.as_ptr() as usize).unwrap();
            heap.free_via_sweep(s, &[p]);
        }
        let report = heap.audit().unwrap();
        prop_assert_eq!(report.busy_spans + report.nonempty_spans + report.empty_spans + report.detached_spans, 0);
    }
}

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use halo_gc::WorkPool;
use std::thread;

fn bench_put_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("gcwork_local");
    const ITEMS: usize = 10_000;

    group.bench_function("put_then_try_get", |b| {
        let pool = WorkPool::default();
        b.iter(|| {
            pool.reset(1);
            let mut work = pool.worker();
            for i in 0..ITEMS {
                work.put(i + 1);
            }
            while let Some(addr) = work.try_get() {
                black_box(addr);
            }
        })
    });

    group.finish();
}

fn bench_parallel_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("gcwork_parallel");
    const ITEMS: usize = 20_000;

    for workers in [2u32, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            let pool = WorkPool::new(64);
            b.iter(|| {
                pool.reset(workers);
                thread::scope(|s| {
                    for w in 0..workers as usize {
                        let pool = &pool;
                        s.spawn(move || {
                            let mut work = pool.worker();
                            if w == 0 {
                                for i in 0..ITEMS {
                                    work.put(i + 1);
                                    if i % 128 == 0 {
                                        work.balance();
                                    }
                                }
                            }
                            while let Some(addr) = work.get() {
                                black_box(addr);
                            }
                        });
                    }
                });
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_put_get, bench_parallel_drain);
criterion_main!(benches);

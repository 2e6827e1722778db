use std::collections::HashSet;
use std::sync::Mutex;

use halo_gc::{MarkReport, WorkPool};

#[test]
fn four_workers_drain_every_pointer() {
    const WORKERS: u32 = 4;
    const POINTERS: usize = 5000;

    let pool = WorkPool::new(32);
    pool.reset(WORKERS);
    let seen = Mutex::new(Vec::with_capacity(POINTERS));

    std::thread::scope(|scope| {
        for w in 0..WORKERS as usize {
            let pool = &pool;
            let seen = &seen;
            scope.spawn(move || {
                let mut work = pool.worker();
                // Each worker seeds a quarter and then processes whatever it can get.
                let share = POINTERS / WORKERS as usize;
                for i in w * share..(w + 1) * share {
                    work.put(0x1000 + i * 16);
                    if i % 64 == 0 {
                        work.balance();
                    }
                }
                let mut mine = Vec::new();
                while let Some(addr) = work.get() {
                    mine.push(addr);
                }
                assert!(work.is_empty());
                seen.lock().unwrap().extend(mine);
            });
        }
    });

    assert!(pool.is_done());
    pool.wait_done();
    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), POINTERS);
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), POINTERS);

    let report = MarkReport { pushed: pool.pushed(), popped: pool.popped(), remaining: 0 };
    assert!(report.is_conserved());
    assert_eq!(pool.pushed(), POINTERS as u64);
    assert_eq!(pool.active_workers(), 0);
}

#[test]
fn interleaved_puts_and_gets_conserve_pointers() {
    const WORKERS: u32 = 4;
    const POINTERS: usize = 5000;

    let pool = WorkPool::new(32);
    pool.reset(WORKERS);
    let seen = Mutex::new(Vec::with_capacity(POINTERS));

    std::thread::scope(|scope| {
        for w in 0..WORKERS as usize {
            let pool = &pool;
            let seen = &seen;
            scope.spawn(move || {
                let mut work = pool.worker();
                let mut mine = Vec::new();
                let share = POINTERS / WORKERS as usize;
                for (n, i) in (w * share..(w + 1) * share).enumerate() {
                    work.put(0x1000 + i * 16);
                    // Pop after every push on some workers and every few on
                    // others, so local buffers keep emptying and swapping.
                    if n % (w + 1) == 0 {
                        for _ in 0..=w % 2 {
                            if let Some(addr) = work.try_get() {
                                mine.push(addr);
                            }
                        }
                    }
                    if n % 50 == 49 {
                        work.balance();
                    }
                }
                while let Some(addr) = work.get() {
                    mine.push(addr);
                }
                assert!(work.is_empty());
                seen.lock().unwrap().extend(mine);
            });
        }
    });

    assert!(pool.is_done());
    let seen = seen.into_inner().unwrap();
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(seen.len(), POINTERS);
    assert_eq!(unique.len(), POINTERS);
    assert_eq!(pool.pushed(), POINTERS as u64);
    assert_eq!(pool.popped(), POINTERS as u64);
    assert!(pool.full_is_empty());
}

#[test]
fn stolen_work_is_processed_by_idle_worker() {
    let pool = WorkPool::new(8);
    pool.reset(2);

    std::thread::scope(|scope| {
        let pool = &pool;
        let idle = scope.spawn(move || {
            let mut work = pool.worker();
            let mut got = 0;
            while work.get().is_some() {
                got += 1;
            }
            got
        });
        let busy = scope.spawn(move || {
            let mut work = pool.worker();
            for i in 0..100 {
                work.put(i + 1);
            }
            let mut got = 0;
            while work.get().is_some() {
                got += 1;
            }
            got
        });
        let total = idle.join().unwrap() + busy.join().unwrap();
        assert_eq!(total, 100);
    });
}

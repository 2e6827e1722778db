use super::*;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_wait_on_u32_wake() {
    let flag = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(Barrier::new(2));
    let flag_thread = flag.clone();
    let barrier_thread = barrier.clone();

    let handle = thread::spawn(move || {
        barrier_thread.wait();
        while flag_thread.load(Ordering::SeqCst) == 0 {
            wait_on_u32(&flag_thread, 0);
        }
        flag_thread.load(Ordering::SeqCst)
    });

    barrier.wait();
    flag.store(1, Ordering::SeqCst);
    wake_all_u32(&flag);

    assert_eq!(handle.join().unwrap(), 1);
}

#[test]
fn test_mutex_lock() {
    let mutex = Mutex::new(5);
    {
        let mut guard = mutex.lock();
        *guard += 1;
        assert!(mutex.try_lock().is_none());
    }
    assert_eq!(*mutex.try_lock().unwrap(), 6);
}

#[test]
fn test_mutex_contention() {
    const THREADS: usize = 8;
    const ITERS: usize = 2_000;
    let mutex = Mutex::new(0usize);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ITERS {
                    *mutex.lock() += 1;
                }
            });
        }
    });

    assert_eq!(mutex.into_inner(), THREADS * ITERS);
}

#[test]
fn test_mutex_sleeper_is_woken() {
    let mutex = Mutex::new(());
    let entered = AtomicBool::new(false);

    thread::scope(|s| {
        let guard = mutex.lock();
        s.spawn(|| {
            let _g = mutex.lock();
            entered.store(true, Ordering::SeqCst);
        });
        // Long enough for the second thread to exhaust its spin budget.
        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        drop(guard);
    });

    assert!(entered.load(Ordering::SeqCst));
}

#[test]
#[should_panic(expected = "unlock of unlocked lock")]
fn test_unlock_of_unlocked_is_fatal() {
    let raw = RawMutex::new();
    unsafe { raw.unlock() };
}

#[test]
fn test_note_wakes_all_sleepers() {
    let note = Note::new();
    let woke = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                note.sleep();
                woke.fetch_add(1, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(20));
        note.wakeup();
    });

    assert_eq!(woke.load(Ordering::SeqCst), 3);
    // Late sleepers return immediately.
    note.sleep();
    note.clear();
    assert!(!note.is_woken());
}

#[test]
#[should_panic(expected = "double wakeup")]
fn test_note_double_wakeup_is_fatal() {
    let note = Note::new();
    note.wakeup();
    note.wakeup();
}

#[test]
fn test_semaphore_release_before_acquire() {
    let sema = Semaphore::new(0);
    sema.release();
    assert_eq!(sema.available(), 1);
    sema.acquire();
    assert!(!sema.try_acquire());
}

#[test]
fn test_semaphore_pairs_every_sleep_with_a_release() {
    const WORKERS: usize = 4;
    let sema = Semaphore::new(0);
    let acquired = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..WORKERS {
            s.spawn(|| {
                sema.acquire();
                acquired.fetch_add(1, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(20));
        for _ in 0..WORKERS {
            sema.release();
        }
    });

    assert_eq!(acquired.load(Ordering::SeqCst), WORKERS);
    assert_eq!(sema.available(), 0);
}

//! The mark work queue.
//!
//! Each mark worker owns a [`GcWork`] with two buffers. Pushes and pops go to
//! the primary buffer; when it fills (or drains) the two are swapped, and only
//! when both are full (or both empty) does the worker touch the shared pool:
//! a full buffer is published on the `full` stack for others to steal and an
//! empty one is taken from the `empty` stack. The two-buffer scheme keeps a
//! worker that oscillates around a buffer boundary off the shared stacks.
//!
//! A worker that runs out of work in [`GcWork::get`] enters the termination
//! barrier in [`WorkPool`]: it spins for a while, then parks on a semaphore.
//! The last of `nproc` workers to arrive with the `full` stack empty ends
//! the phase and wakes everyone.

use core::cell::Cell;
use core::marker::PhantomData;
use core::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use super::workbuf::WorkBuf;
use crate::concurrency::sync::{Note, Semaphore};
use crate::concurrency::worklist::{LfStack, NodeArena, NodeId};
use crate::error::fatal;

/// Shared buffers and barrier state for one mark phase.
pub struct WorkPool {
    arena: NodeArena<WorkBuf>,
    full: LfStack,
    empty: LfStack,
    capacity: usize,

    nproc: AtomicU32,
    nwait: AtomicU32,
    done: AtomicBool,
    sleepers: AtomicU32,
    idle: Semaphore,
    done_note: Note,

    pushed: AtomicU64,
    popped: AtomicU64,
    active: AtomicUsize,
}

impl WorkPool {
    /// Creates a pool whose buffers hold `capacity` addresses each.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            fatal("work buffer capacity must be positive");
        }
        Self {
            arena: NodeArena::new(),
            full: LfStack::new(),
            empty: LfStack::new(),
            capacity,
            nproc: AtomicU32::new(1),
            nwait: AtomicU32::new(0),
            done: AtomicBool::new(false),
            sleepers: AtomicU32::new(0),
            idle: Semaphore::new(0),
            done_note: Note::new(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            active: AtomicUsize::new(0),
        }
    }

    /// Creates a worker handle.
    pub fn worker(&self) -> GcWork<'_> {
        GcWork { pool: self, wbuf1: None, wbuf2: None, pushed: 0, popped: 0, _not_sync: PhantomData }
    }

    /// Addresses per buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers ever created.
    pub fn buffers(&self) -> usize {
        self.arena.len()
    }

    /// Addresses pushed by disposed workers this phase.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Acquire)
    }

    /// Addresses popped by disposed workers this phase.
    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Acquire)
    }

    /// Workers currently holding buffers.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the termination barrier has completed.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Whether no full buffer is waiting to be stolen.
    pub fn full_is_empty(&self) -> bool {
        self.full.is_empty()
    }

    /// Blocks until the termination barrier completes.
    pub fn wait_done(&self) {
        self.done_note.sleep();
    }

    /// Prepares the pool for a phase run by `nproc` workers.
    ///
    /// The barrier completes once `nproc` workers are waiting in
    /// [`GcWork::get`] with no full buffer left. Resetting while a worker
    /// still holds buffers is fatal.
    pub fn reset(&self, nproc: u32) {
        if nproc == 0 {
            fatal("mark phase needs at least one worker");
        }
        if self.active_workers() != 0 {
            fatal("work pool reset while workers hold buffers");
        }
        while self.idle.try_acquire() {}
        self.nproc.store(nproc, Ordering::Release);
        self.nwait.store(0, Ordering::Release);
        self.sleepers.store(0, Ordering::Release);
        self.pushed.store(0, Ordering::Release);
        self.popped.store(0, Ordering::Release);
        self.done_note.clear();
        self.done.store(false, Ordering::Release);
    }

    /// Empties every full buffer and returns how many addresses they held.
    pub(crate) fn drain(&self) -> u64 {
        let mut remaining = 0;
        while let Some(id) = self.full.pop(&self.arena) {
            // Safety: popped, so we own the node.
            let buf = unsafe { self.arena.value_mut(id) };
            remaining += buf.len() as u64;
            buf.clear();
            self.empty.push(&self.arena, id);
        }
        remaining
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn buf(&self, id: NodeId) -> &mut WorkBuf {
        self.arena.value_mut(id)
    }

    fn get_empty(&self) -> NodeId {
        match self.empty.pop(&self.arena) {
            Some(id) => id,
            None => self.arena.alloc(WorkBuf::with_capacity(self.capacity)),
        }
    }

    fn put_empty(&self, id: NodeId) {
        // Safety: the caller owns `id` until the push.
        if !unsafe { self.buf(id) }.is_empty() {
            fatal("workbuf is not empty");
        }
        self.empty.push(&self.arena, id);
    }

    fn put_full(&self, id: NodeId) {
        // Safety: the caller owns `id` until the push.
        if unsafe { self.buf(id) }.is_empty() {
            fatal("workbuf is empty");
        }
        self.full.push(&self.arena, id);
        fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            self.idle.release();
        }
    }

    fn try_get_full(&self) -> Option<NodeId> {
        self.full.pop(&self.arena)
    }

    /// Pops a full buffer, waiting for one as long as some worker may still
    /// produce work. Returns `None` once the phase has terminated.
    fn get_full(&self) -> Option<NodeId> {
        if let Some(id) = self.try_get_full() {
            return Some(id);
        }

        let nproc = self.nproc.load(Ordering::Acquire);
        if self.nwait.fetch_add(1, Ordering::AcqRel) + 1 > nproc {
            fatal("work.nwait > work.nproc");
        }

        let backoff = Backoff::new();
        loop {
            if self.is_done() {
                return None;
            }
            if !self.full.is_empty() {
                if self.nwait.fetch_sub(1, Ordering::AcqRel) == nproc + 1 {
                    fatal("work.nwait > work.nproc");
                }
                if let Some(id) = self.try_get_full() {
                    return Some(id);
                }
                if self.nwait.fetch_add(1, Ordering::AcqRel) + 1 > nproc {
                    fatal("work.nwait > work.nproc");
                }
            }
            if self.nwait.load(Ordering::Acquire) == nproc && self.full.is_empty() {
                self.complete();
                return None;
            }

            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }

            self.sleepers.fetch_add(1, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            let quiet = !self.is_done()
                && self.full.is_empty()
                && self.nwait.load(Ordering::Acquire) != nproc;
            if quiet {
                self.idle.acquire();
            }
            self.sleepers.fetch_sub(1, Ordering::SeqCst);
            backoff.reset();
        }
    }

    fn complete(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        fence(Ordering::SeqCst);
        for _ in 0..self.sleepers.load(Ordering::SeqCst) {
            self.idle.release();
        }
        self.done_note.wakeup();
    }
}

impl Default for WorkPool {
    fn default() -> Self {
        Self::new(crate::constants::WORKBUF_CAPACITY)
    }
}

impl core::fmt::Debug for WorkPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkPool")
            .field("capacity", &self.capacity)
            .field("buffers", &self.buffers())
            .field("nproc", &self.nproc.load(Ordering::Relaxed))
            .field("nwait", &self.nwait.load(Ordering::Relaxed))
            .field("done", &self.is_done())
            .finish()
    }
}

/// A mark worker's view of the work queue.
///
/// Both buffers are present or both absent: a worker takes buffers on first
/// use and gives them back in [`dispose`](Self::dispose), which also runs on
/// drop.
pub struct GcWork<'p> {
    pool: &'p WorkPool,
    wbuf1: Option<NodeId>,
    wbuf2: Option<NodeId>,
    pushed: u64,
    popped: u64,
    _not_sync: PhantomData<Cell<()>>,
}

impl<'p> GcWork<'p> {
    /// The pool this worker draws from.
    pub fn pool(&self) -> &'p WorkPool {
        self.pool
    }

    fn init(&mut self) -> (NodeId, NodeId) {
        let wbuf1 = self.pool.get_empty();
        let wbuf2 = self.pool.try_get_full().unwrap_or_else(|| self.pool.get_empty());
        self.wbuf1 = Some(wbuf1);
        self.wbuf2 = Some(wbuf2);
        self.pool.active.fetch_add(1, Ordering::AcqRel);
        (wbuf1, wbuf2)
    }

    fn bufs(&mut self) -> (NodeId, NodeId) {
        match (self.wbuf1, self.wbuf2) {
            (Some(a), Some(b)) => (a, b),
            (None, None) => self.init(),
            _ => fatal("gcWork holds exactly one buffer"),
        }
    }

    /// Queues `addr` for scanning.
    pub fn put(&mut self, addr: usize) {
        let pool = self.pool;
        let (mut wbuf1, wbuf2) = self.bufs();
        // Safety: both buffers are owned by this worker.
        unsafe {
            if pool.buf(wbuf1).is_full() {
                self.wbuf1 = Some(wbuf2);
                self.wbuf2 = Some(wbuf1);
                wbuf1 = wbuf2;
                if pool.buf(wbuf1).is_full() {
                    pool.put_full(wbuf1);
                    wbuf1 = pool.get_empty();
                    self.wbuf1 = Some(wbuf1);
                }
            }
            pool.buf(wbuf1).push(addr);
        }
        self.pushed += 1;
    }

    /// Takes an address if local or global work is available, without waiting.
    pub fn try_get(&mut self) -> Option<usize> {
        self.get_with(WorkPool::try_get_full)
    }

    /// Takes an address, waiting in the termination barrier when there is no
    /// work anywhere. Returns `None` once every worker has run dry.
    pub fn get(&mut self) -> Option<usize> {
        self.get_with(WorkPool::get_full)
    }

    fn get_with(&mut self, fetch: fn(&WorkPool) -> Option<NodeId>) -> Option<usize> {
        let pool = self.pool;
        let (mut wbuf1, wbuf2) = self.bufs();
        // Safety: both buffers are owned by this worker.
        unsafe {
            if pool.buf(wbuf1).is_empty() {
                self.wbuf1 = Some(wbuf2);
                self.wbuf2 = Some(wbuf1);
                wbuf1 = wbuf2;
                if pool.buf(wbuf1).is_empty() {
                    let stolen = fetch(pool)?;
                    pool.put_empty(wbuf1);
                    wbuf1 = stolen;
                    self.wbuf1 = Some(wbuf1);
                }
            }
            let addr = pool.buf(wbuf1).pop();
            if addr.is_some() {
                self.popped += 1;
            }
            addr
        }
    }

    /// Publishes half of the local work when others may be starving.
    pub fn balance(&mut self) {
        let pool = self.pool;
        let (Some(wbuf1), Some(wbuf2)) = (self.wbuf1, self.wbuf2) else {
            return;
        };
        // Safety: both buffers are owned by this worker until pushed.
        unsafe {
            if !pool.buf(wbuf2).is_empty() {
                pool.put_full(wbuf2);
                self.wbuf2 = Some(pool.get_empty());
            } else if pool.buf(wbuf1).len() > 4 && pool.full.is_empty() {
                let half = pool.get_empty();
                pool.buf(wbuf1).split_into(pool.buf(half));
                pool.put_full(wbuf1);
                self.wbuf1 = Some(half);
            }
        }
    }

    /// Whether both local buffers are empty.
    pub fn is_empty(&self) -> bool {
        match (self.wbuf1, self.wbuf2) {
            // Safety: both buffers are owned by this worker.
            (Some(a), Some(b)) => unsafe { self.pool.buf(a).is_empty() && self.pool.buf(b).is_empty() },
            _ => true,
        }
    }

    /// Addresses pushed through this handle since it last disposed.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Addresses popped through this handle since it last disposed.
    pub fn popped(&self) -> u64 {
        self.popped
    }

    /// Returns both buffers to the pool, routing non-empty ones to the full
    /// stack so their work stays stealable, and folds the counters into it.
    pub fn dispose(&mut self) {
        let pool = self.pool;
        if let (Some(wbuf1), Some(wbuf2)) = (self.wbuf1.take(), self.wbuf2.take()) {
            for id in [wbuf1, wbuf2] {
                // Safety: owned by this worker until pushed.
                if unsafe { pool.buf(id) }.is_empty() {
                    pool.put_empty(id);
                } else {
                    pool.put_full(id);
                }
            }
            pool.active.fetch_sub(1, Ordering::AcqRel);
        }
        pool.pushed.fetch_add(core::mem::take(&mut self.pushed), Ordering::AcqRel);
        pool.popped.fetch_add(core::mem::take(&mut self.popped), Ordering::AcqRel);
    }
}

impl Drop for GcWork<'_> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl core::fmt::Debug for GcWork<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GcWork")
            .field("pushed", &self.pushed)
            .field("popped", &self.popped)
            .field("empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_spills_to_full_stack() {
        let pool = WorkPool::new(4);
        pool.reset(1);
        let mut w = pool.worker();
        for i in 0..9 {
            w.put(i);
        }
        assert!(!pool.full_is_empty());
        let mut got = Vec::new();
        while let Some(a) = w.try_get() {
            got.push(a);
        }
        got.sort_unstable();
        assert_eq!(got, (0..9).collect::<Vec<_>>());
        assert!(w.is_empty());
        drop(w);
        assert_eq!(pool.pushed(), 9);
        assert_eq!(pool.popped(), 9);
        assert_eq!(pool.active_workers(), 0);
    }

    #[test]
    fn dispose_keeps_work_stealable() {
        let pool = WorkPool::new(8);
        pool.reset(2);
        let mut a = pool.worker();
        a.put(1);
        a.put(2);
        a.dispose();
        let mut b = pool.worker();
        let mut got = vec![b.try_get().unwrap(), b.try_get().unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![1, 2]);
        assert_eq!(b.try_get(), None);
    }

    #[test]
    fn balance_publishes_half() {
        let pool = WorkPool::new(16);
        pool.reset(1);
        let mut w = pool.worker();
        for i in 0..10 {
            w.put(i);
        }
        w.balance();
        assert!(!pool.full_is_empty());
        let mut count = 0;
        while w.try_get().is_some() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn single_worker_terminates() {
        let pool = WorkPool::new(4);
        pool.reset(1);
        let mut w = pool.worker();
        w.put(7);
        assert_eq!(w.get(), Some(7));
        assert_eq!(w.get(), None);
        assert!(pool.is_done());
        pool.wait_done();
    }

    #[test]
    #[should_panic(expected = "workers hold buffers")]
    fn reset_with_live_worker_is_fatal() {
        let pool = WorkPool::new(4);
        pool.reset(1);
        let mut w = pool.worker();
        w.put(1);
        pool.reset(1);
    }
}

//! # `halo-gc` - Tiered Heap and Mark-Work Toolkit
//!
//! A size-class allocator for a garbage-collected runtime, together with the
//! lock-free queue its parallel mark workers share work through.
//!
//! ## Architecture
//!
//! Allocation is tiered so the common path takes no locks:
//!
//! 1. **Thread caches** ([`ThreadCache`]):
//!    - One span per size class, owned by one thread
//!    - Objects come off the span's free list without synchronization
//!
//! 2. **Central lists** ([`alloc::Central`]):
//!    - One per size class, split into spans with and without free objects
//!    - Sweep spans lazily before handing them to a cache
//!
//! 3. **Page heap** ([`Heap`]):
//!    - Carves page-aligned spans out of one reserved arena
//!    - Coalesces freed neighbours and returns idle pages to the OS
//!
//! Collection is split in two. During a mark phase workers exchange object
//! addresses through a [`WorkPool`] until every worker runs dry; the
//! following sweep returns unmarked objects to their spans and empty spans
//! to the page heap.
//!
//! ### Invariants
//!
//! - A span is in exactly one place at a time: a heap free list, a heap busy
//!   list, a central list, a thread cache, or a caller's hands. [`Heap::audit`]
//!   checks this.
//! - A span's sweep generation is `G - 2` (unswept), `G - 1` (being swept) or
//!   `G` (swept) relative to the heap's generation `G`.
//! - A broken invariant is never returned as an error; it aborts.
//!
//! ## Example
//!
//! ```rust
//! use halo_gc::{Heap, HeapConfig};
//!
//! let heap = Heap::new(HeapConfig::default().with_arena_bytes(8 << 20)).unwrap();
//! let mut cache = heap.thread_cache();
//!
//! let p = cache.allocate(24).unwrap();
//! let span = heap.lookup_span(p.as_ptr() as usize).unwrap();
//! assert_eq!(span.elem_size(), 32);
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod alloc;
pub mod concurrency;
pub mod config;
pub mod constants;
pub mod error;
pub mod gc;
pub mod stats;

pub use alloc::{AuditError, AuditReport, Heap, OsPages, PageSource, SpanRef, SpanState, ThreadCache};
pub use concurrency::sync::{Mutex, Note, Semaphore};
pub use concurrency::worklist::{LfStack, NodeArena};
pub use config::HeapConfig;
pub use error::{ConfigError, HeapError};
pub use gc::{Collector, GcWork, MarkReport, WorkPool};
pub use stats::{HeapStats, StatsSnapshot};

// Compile-time checks on the layout constants.
const _: () = {
    use constants::{MAX_SMALL_SIZE, PAGE_SIZE, WORKBUF_CAPACITY, WORKBUF_SIZE};

    assert!(PAGE_SIZE.is_power_of_two());
    assert!(MAX_SMALL_SIZE % PAGE_SIZE == 0);

    // A work buffer's header and slots fill exactly one 2KB block.
    assert!((WORKBUF_CAPACITY + 3) * core::mem::size_of::<usize>() <= WORKBUF_SIZE);

    // Free-list links are stored in the objects themselves.
    assert!(core::mem::size_of::<alloc::span::FreeObject>() <= 8);
};

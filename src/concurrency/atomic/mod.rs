//! Atomic types used by the lock-free structures.
//!
//! Under `--cfg loom` these resolve to loom's model-checked atomics so the
//! stack and its arena can be explored exhaustively; otherwise they are the
//! plain `core` atomics.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize};

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize};

pub(crate) use core::sync::atomic::Ordering;

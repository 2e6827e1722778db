//! Synchronization and lock-free primitives used by the heap and collector.

pub(crate) mod atomic;
pub mod sync;
pub mod worklist;

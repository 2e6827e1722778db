//! Mark-phase work distribution.
//!
//! Mark workers shuttle object addresses through fixed-size [`WorkBuf`]s.
//! Buffers move between workers on two lock-free stacks owned by a
//! [`WorkPool`]; a [`Collector`] drives a phase over a heap.

pub mod collector;
pub mod gcwork;
pub mod workbuf;

pub use collector::{Collector, MarkReport};
pub use gcwork::{GcWork, WorkPool};
pub use workbuf::WorkBuf;

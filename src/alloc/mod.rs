//! The tiered allocator.
//!
//! Requests flow from a per-thread [`ThreadCache`] to the per-class
//! [`Central`] lists to the page [`Heap`], which carves spans out of one
//! reserved arena. Metadata comes from [`FixAlloc`]; sizes are rounded by the
//! [`SizeClassTable`].

pub mod audit;
pub mod cache;
pub mod central;
pub mod fixalloc;
pub mod heap;
mod mark_bits;
pub mod page;
pub mod size_class;
pub mod span;
mod sweep;
mod syscall;

pub use audit::{AuditError, AuditReport};
pub use cache::ThreadCache;
pub use central::Central;
pub use fixalloc::{Block, FixAlloc};
pub use heap::Heap;
pub use page::{OsPages, PageSource};
pub use size_class::{size_classes, DivMagic, SizeClass, SizeClassTable};
pub use span::{SpanOwner, SpanRef, SpanState};

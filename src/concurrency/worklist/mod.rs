//! Lock-free building blocks for the mark work queue.
//!
//! Nodes live in a [`NodeArena`] and are named by index; [`LfStack`] moves
//! them between owners without locks.

pub mod arena;
pub mod lfstack;

pub use arena::{NodeArena, NodeId};
pub use lfstack::LfStack;

//! Raw virtual-memory calls behind [`OsPages`](super::page::OsPages).

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use unix::*;

#[cfg(windows)]
pub(crate) use windows::*;

use core::sync::atomic::{AtomicU32, Ordering};

use super::{wait_on_u32, wake_all_u32};
use crate::error::fatal;

/// A one-shot event: one thread sleeps until another calls [`wakeup`](Note::wakeup).
///
/// After `clear`, exactly one `wakeup` is allowed; a second one is a fatal
/// error. Any number of threads may `sleep`; all of them return once the note
/// has been woken, including threads that arrive afterwards.
#[derive(Debug, Default)]
pub struct Note {
    key: AtomicU32,
}

impl Note {
    /// Creates a cleared note.
    pub const fn new() -> Self {
        Self { key: AtomicU32::new(0) }
    }

    /// Resets the note so it can be woken again.
    pub fn clear(&self) {
        self.key.store(0, Ordering::Release);
    }

    /// Signals the note, releasing every sleeper.
    pub fn wakeup(&self) {
        if self.key.swap(1, Ordering::AcqRel) != 0 {
            fatal("notewakeup - double wakeup");
        }
        wake_all_u32(&self.key);
    }

    /// Blocks until the note is signalled.
    pub fn sleep(&self) {
        while self.key.load(Ordering::Acquire) == 0 {
            wait_on_u32(&self.key, 0);
        }
    }

    /// Whether the note has been signalled since the last `clear`.
    pub fn is_woken(&self) -> bool {
        self.key.load(Ordering::Acquire) != 0
    }
}

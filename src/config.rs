//! Heap configuration.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    ARENA_RESERVE_SIZE, FIX_ALLOC_CHUNK, HEAP_ALLOC_CHUNK, HEAP_GROW_ALIGN, MAX_SMALL_SIZE,
    PAGE_SIZE, WORKBUF_CAPACITY,
};
use crate::error::ConfigError;

/// Tunables for a [`Heap`](crate::alloc::Heap) and its collector.
///
/// Every field has a default, so a JSON document only needs to name the
/// values it changes:
///
/// ```rust
/// use halo_gc::HeapConfig;
///
/// let config = HeapConfig::from_json(r#"{ "arena_bytes": 67108864 }"#).unwrap();
/// assert_eq!(config.arena_bytes, 64 << 20);
/// assert_eq!(config.heap_chunk_bytes, 1 << 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Size of the virtual reservation backing the heap.
    pub arena_bytes: usize,
    /// Minimum number of bytes committed each time the heap grows.
    pub heap_chunk_bytes: usize,
    /// Chunk size of the metadata allocator for spans and cache records.
    pub fixalloc_chunk_bytes: usize,
    /// Addresses held by one mark work buffer.
    pub workbuf_capacity: usize,
    /// Idle time after which free spans are returned to the OS, in milliseconds.
    pub scavenge_age_ms: u64,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            arena_bytes: ARENA_RESERVE_SIZE,
            heap_chunk_bytes: HEAP_ALLOC_CHUNK,
            fixalloc_chunk_bytes: FIX_ALLOC_CHUNK,
            workbuf_capacity: WORKBUF_CAPACITY,
            scavenge_age_ms: 5 * 60 * 1000,
        }
    }
}

impl HeapConfig {
    /// Parses a configuration from JSON and validates it.
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed JSON and
    /// `ConfigError::Invalid` for values that fail [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the arena reservation size.
    #[must_use]
    pub fn with_arena_bytes(mut self, bytes: usize) -> Self {
        self.arena_bytes = bytes;
        self
    }

    /// Sets the minimum growth step.
    #[must_use]
    pub fn with_heap_chunk_bytes(mut self, bytes: usize) -> Self {
        self.heap_chunk_bytes = bytes;
        self
    }

    /// Sets the number of addresses per work buffer.
    #[must_use]
    pub fn with_workbuf_capacity(mut self, capacity: usize) -> Self {
        self.workbuf_capacity = capacity;
        self
    }

    /// Sets the scavenger idle threshold.
    #[must_use]
    pub fn with_scavenge_age(mut self, age: Duration) -> Self {
        self.scavenge_age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Idle threshold used by [`Heap::scavenge_idle`](crate::alloc::Heap::scavenge_idle).
    pub fn scavenge_age(&self) -> Duration {
        Duration::from_millis(self.scavenge_age_ms)
    }

    /// Checks that the values describe a usable heap.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena_bytes < HEAP_GROW_ALIGN || self.arena_bytes % PAGE_SIZE != 0 {
            return Err(ConfigError::Invalid {
                field: "arena_bytes",
                reason: "must be a page multiple of at least 64KB",
            });
        }
        if self.heap_chunk_bytes == 0 || self.heap_chunk_bytes % HEAP_GROW_ALIGN != 0 {
            return Err(ConfigError::Invalid {
                field: "heap_chunk_bytes",
                reason: "must be a non-zero multiple of 64KB",
            });
        }
        if self.fixalloc_chunk_bytes < PAGE_SIZE {
            return Err(ConfigError::Invalid {
                field: "fixalloc_chunk_bytes",
                reason: "must be at least one page",
            });
        }
        if self.workbuf_capacity == 0 || self.workbuf_capacity > MAX_SMALL_SIZE {
            return Err(ConfigError::Invalid {
                field: "workbuf_capacity",
                reason: "must be between 1 and 32768",
            });
        }
        Ok(())
    }
}

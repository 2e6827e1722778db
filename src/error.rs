//! Error types and the fatal-violation path.
//!
//! Two kinds of failure exist. Running out of memory is an ordinary error that
//! flows back to the caller as [`HeapError`]. A broken heap invariant (a span
//! freed twice, a cache refilled while it still has objects, a generation in
//! an impossible state) is never returned: [`fatal`] reports it and aborts,
//! since the heap can no longer be trusted.

use core::fmt;

/// The error type for heap operations that can fail without corrupting state.
#[derive(Debug)]
pub enum HeapError {
    /// The arena has no room left for a request of `requested` bytes.
    OutOfMemory {
        /// Bytes the heap tried to obtain.
        requested: usize,
    },
    /// The operating system refused to reserve the arena.
    ReserveFailed {
        /// Size of the refused reservation.
        bytes: usize,
    },
    /// The configuration was rejected.
    Config(ConfigError),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: could not obtain {requested} bytes")
            }
            Self::ReserveFailed { bytes } => {
                write!(f, "failed to reserve a {bytes} byte arena")
            }
            Self::Config(_) => f.write_str("invalid heap configuration"),
        }
    }
}

impl std::error::Error for HeapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for HeapError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// The error type for configuration parsing and validation.
#[derive(Debug)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    Parse(serde_json::Error),
    /// A field holds a value the heap cannot work with.
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(_) => f.write_str("failed to parse heap configuration"),
            Self::Invalid { field, reason } => write!(f, "`{field}` {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err)
    }
}

/// Reports a violated heap invariant and terminates the process.
///
/// Unit tests build this as a panic so that violations can be asserted with
/// `#[should_panic]`.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(what: &str) -> ! {
    tracing::error!(violation = what, "fatal heap invariant violation");
    if cfg!(test) {
        panic!("fatal: {what}");
    }
    eprintln!("fatal error: {what}");
    std::process::abort()
}

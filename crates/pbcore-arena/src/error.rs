//! Arena-specific error types.

use std::error::Error;
use std::fmt;

/// Errors that can occur while constructing an arena.
///
/// Allocation itself never fails with an error: running out of memory
/// aborts through [`std::alloc::handle_alloc_error`], and a request so large
/// that its block size overflows `usize` is a programming error that panics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The supplied [`ArenaOptions`](crate::ArenaOptions) are inconsistent.
    InvalidConfig {
        /// Human-readable description of what is wrong.
        reason: String,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid arena config: {reason}"),
        }
    }
}

impl Error for ArenaError {}

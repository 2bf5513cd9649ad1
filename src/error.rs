//! Typed errors for the OS-facing region boundary.
//!
//! The public allocator API never returns these: every public entry point
//! collapses failure to a null pointer (or a no-op, for `free`) after
//! logging. `RegionError` exists so the region manager itself has
//! something better than `bool` to hand back internally.

use thiserror::Error;

/// Failure obtaining or releasing OS-backed memory.
#[derive(Debug, Error)]
pub enum RegionError {
    /// The anonymous mapping syscall refused the request (out-of-memory or
    /// resource limits).
    #[error("failed to map {size} bytes: {source}")]
    MapFailed {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    /// The unmapping syscall failed during region reclamation. The chain
    /// has already been updated by the time this is raised, so it is
    /// reported but does not block the caller.
    #[error("failed to unmap region at {addr:#x} ({size} bytes): {source}")]
    UnmapFailed {
        addr: usize,
        size: usize,
        #[source]
        source: std::io::Error,
    },

    /// A zero-byte mapping was requested; degenerate input.
    #[error("requested a zero-byte region")]
    ZeroSizeRequest,
}

pub type Result<T> = std::result::Result<T, RegionError>;

//! Default "unsupported" operation bodies.
//!
//! Backends that omit a capability inherit these through the
//! [`Backend`](crate::Backend) trait defaults instead of writing their own
//! stubs; a read-only backend simply never overrides the write surface.

use crate::error::{VfsError, VfsResult};

/// Fail an operation the backend does not implement.
pub fn unsupported<T>(op: &'static str) -> VfsResult<T> {
    tracing::trace!(op, "operation not supported by backend");
    Err(VfsError::Unsupported)
}

/// Close-style operations succeed silently on backends without state to
/// release, and on handles that are already gone.
pub fn close() {}

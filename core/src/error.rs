use std::io;

use thiserror::Error;

/// Error surface shared by every backend.
///
/// This is intentionally "errno-like": each variant is a semantic failure
/// mode a caller can react to. Host errors are mapped onto it exactly once,
/// at the backend boundary; nothing above a backend re-maps them.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum VfsError {
    /// The host returned an error that is not meaningful to callers.
    #[error("unexpected host error")]
    Unexpected,
    /// The backend does not implement this operation.
    #[error("operation not supported")]
    Unsupported,
    /// The capability bit is unset, or the host refused the operation.
    #[error("permission denied")]
    PermissionDenied,
    /// Allocator failure.
    #[error("out of memory")]
    OutOfMemory,
    /// The requested entry does not exist (also used for stale handles).
    #[error("file not found")]
    FileNotFound,
    #[error("not a directory")]
    NotDir,
    #[error("is a directory")]
    IsDir,
    #[error("path already exists")]
    PathAlreadyExists,
    #[error("directory not empty")]
    DirNotEmpty,
    /// Host descriptors, quota or disk space exhausted.
    #[error("resource limit reached")]
    ResourceLimitReached,
    #[error("handle not open for reading")]
    NotOpenForReading,
    #[error("handle not open for writing")]
    NotOpenForWriting,
    #[error("handle not open for iteration")]
    NotOpenForIteration,
    #[error("handle cannot seek")]
    Unseekable,
    #[error("no space left on device")]
    NoSpaceLeft,
    /// Path failed validation.
    #[error("invalid path")]
    InvalidPath,
}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => VfsError::FileNotFound,
            io::ErrorKind::PermissionDenied => VfsError::PermissionDenied,
            io::ErrorKind::AlreadyExists => VfsError::PathAlreadyExists,
            io::ErrorKind::Unsupported => VfsError::Unsupported,
            io::ErrorKind::OutOfMemory => VfsError::OutOfMemory,
            _ => VfsError::Unexpected,
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

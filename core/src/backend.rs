//! The backend operation vocabulary.
//!
//! A [`Backend`] is pure storage plus handle bookkeeping: it receives
//! already validated, already relative [`SafePath`]s and handles that were
//! minted by itself. Permission gating and root rebinding happen above it,
//! in [`Vfs`](crate::Vfs).

use std::io::{IoSlice, IoSliceMut};

use crate::error::VfsResult;
use crate::noop;
use crate::path::SafePath;
use crate::types::{
    Dir, DirDeleteOptions, DirEntry, DirOpenOptions, File, FileOpenOptions, IterId, Stat, Whence,
};

/// Storage backend for a VFS.
///
/// Paths are relative to `parent`; the root sentinel [`Dir::ROOT`] names
/// the backend's own root. The write, delete and seek surfaces default to
/// `Unsupported` so read-only backends only implement what they serve;
/// close operations are no-ops by default and must stay silent for unknown
/// handles (double-close is not an error).
pub trait Backend: Send + Sync + 'static {
    fn open_dir(&self, parent: Dir, path: SafePath<'_>, opts: DirOpenOptions) -> VfsResult<Dir>;

    fn close_dir(&self, dir: Dir) {
        let _ = dir;
        noop::close();
    }

    fn delete_dir(
        &self,
        parent: Dir,
        path: SafePath<'_>,
        opts: DirDeleteOptions,
    ) -> VfsResult<()> {
        let _ = (parent, path, opts);
        noop::unsupported("delete_dir")
    }

    fn stat(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<Stat>;

    /// Start iterating `dir`. The returned cookie stays valid until
    /// [`Backend::iter_close`], independently of other cookies on the same
    /// directory.
    fn iter_open(&self, dir: Dir) -> VfsResult<IterId>;

    fn iter_next(&self, iter: IterId) -> VfsResult<Option<DirEntry>>;

    fn iter_reset(&self, iter: IterId) -> VfsResult<()>;

    fn iter_close(&self, iter: IterId) {
        let _ = iter;
        noop::close();
    }

    fn open_file(&self, parent: Dir, path: SafePath<'_>, opts: FileOpenOptions)
        -> VfsResult<File>;

    fn close_file(&self, file: File) {
        let _ = file;
        noop::close();
    }

    fn delete_file(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<()> {
        let _ = (parent, path);
        noop::unsupported("delete_file")
    }

    /// Move the per-handle cursor; returns the new offset.
    fn seek(&self, file: File, delta: u64, whence: Whence) -> VfsResult<u64> {
        let _ = (file, delta, whence);
        noop::unsupported("seek")
    }

    /// Scatter read at the per-handle cursor, advancing it by the returned
    /// count. Partial reads return early with what was transferred.
    fn readv(&self, file: File, bufs: &mut [IoSliceMut<'_>]) -> VfsResult<usize>;

    /// Positional scatter read; never touches the per-handle cursor.
    fn preadv(&self, file: File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> VfsResult<usize>;

    /// Gather write at the per-handle cursor, advancing it by the returned
    /// count. Partial writes return early with what was transferred.
    fn writev(&self, file: File, bufs: &[IoSlice<'_>]) -> VfsResult<usize> {
        let _ = (file, bufs);
        noop::unsupported("writev")
    }

    /// Positional gather write; never touches the per-handle cursor.
    fn pwritev(&self, file: File, bufs: &[IoSlice<'_>], offset: u64) -> VfsResult<usize> {
        let _ = (file, bufs, offset);
        noop::unsupported("pwritev")
    }
}

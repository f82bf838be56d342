//! Directory iteration state.

use crate::error::VfsResult;
use crate::types::{Dir, DirEntry, IterId};
use crate::vfs::Vfs;

/// An in-progress directory iteration.
///
/// Bundles the owning VFS, the directory being iterated, and the backend's
/// iteration cookie. Entry order is backend-defined but stable across
/// [`DirIter::reset`] within one iterator lifetime. Dropping the iterator
/// releases the backend state but never the directory handle; the walker
/// uses [`DirIter::close_with_dir`] for directories it opened itself.
pub struct DirIter {
    vfs: Vfs,
    dir: Dir,
    stream: IterId,
    closed: bool,
}

impl DirIter {
    pub(crate) fn new(vfs: Vfs, dir: Dir, stream: IterId) -> Self {
        Self {
            vfs,
            dir,
            stream,
            closed: false,
        }
    }

    /// The directory this iterator walks over.
    pub fn dir(&self) -> Dir {
        self.dir
    }

    /// The VFS the iteration runs against.
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// The next entry, or `None` at the end. Basenames always satisfy
    /// `SafePath` validation; backends skip host entries that do not.
    pub fn next(&mut self) -> VfsResult<Option<DirEntry>> {
        self.vfs.backend().iter_next(self.stream)
    }

    /// Reposition to the beginning.
    pub fn reset(&mut self) -> VfsResult<()> {
        self.vfs.backend().iter_reset(self.stream)
    }

    /// Release the iteration state. The directory handle stays open.
    pub fn close(mut self) {
        self.release();
    }

    /// Release the iteration state and close the directory as well.
    pub fn close_with_dir(mut self) {
        self.release();
        self.vfs.close_dir(self.dir);
    }

    fn release(&mut self) {
        if !self.closed {
            self.vfs.backend().iter_close(self.stream);
            self.closed = true;
        }
    }
}

impl Drop for DirIter {
    fn drop(&mut self) {
        self.release();
    }
}

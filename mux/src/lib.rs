//! Tagged multiplexer backend: a fixed set of child VFSes sharing one
//! 32-bit handle space.
//!
//! `N` child slots are addressed by tags `0..N`. Handles pack the tag into
//! their low `index_bits = ceil(log2(N + 1))` bits and the child's own
//! handle into the remaining high bits, so handle 0 is exactly
//! `{tag 0, inner 0}` — the root of the first mount — and
//! `root_dir(tag)` is just the tag value. No method allocates.

use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;

use parking_lot::Mutex;

use harha_core::{
    Backend, Dir, DirDeleteOptions, DirEntry, DirOpenOptions, File, FileOpenOptions, IterId,
    Permissions, SafePath, Stat, Vfs, VfsError, VfsResult, Whence,
};

#[derive(Clone)]
pub struct MuxFs<const N: usize> {
    inner: Arc<Mutex<[Option<Vfs>; N]>>,
}

impl<const N: usize> Default for MuxFs<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MuxFs<N> {
    /// Low bits holding the mount tag: enough to represent `N` itself, so
    /// every tag `0..N` fits with at least one spare encoding.
    pub const INDEX_BITS: u32 = 32 - (N as u32).leading_zeros();
    pub const INNER_BITS: u32 = 32 - Self::INDEX_BITS;
    const TAG_MASK: u32 = (1 << Self::INDEX_BITS) - 1;

    pub fn new() -> Self {
        // A compile-time N beyond the packable range is a programming
        // error, caught at construction.
        assert!(N >= 1 && Self::INDEX_BITS < 32, "mount count not packable");
        Self {
            inner: Arc::new(Mutex::new(std::array::from_fn(|_| None))),
        }
    }

    /// Attach `fs` at `tag`. The slot must be empty.
    pub fn mount(&self, tag: u32, fs: &Vfs) -> VfsResult<()> {
        let slot = usize::try_from(tag).map_err(|_| VfsError::InvalidPath)?;
        let mut mounts = self.inner.lock();
        let slot = mounts.get_mut(slot).ok_or(VfsError::InvalidPath)?;
        if slot.is_some() {
            return Err(VfsError::PathAlreadyExists);
        }
        *slot = Some(fs.clone());
        Ok(())
    }

    /// Detach the child at `tag`. Handles minted for it become stale.
    pub fn unmount(&self, tag: u32) -> VfsResult<()> {
        let slot = usize::try_from(tag).map_err(|_| VfsError::FileNotFound)?;
        let mut mounts = self.inner.lock();
        let slot = mounts.get_mut(slot).ok_or(VfsError::FileNotFound)?;
        if slot.take().is_none() {
            return Err(VfsError::FileNotFound);
        }
        Ok(())
    }

    /// The root directory of the mount at `tag`: `{tag, inner 0}`.
    pub fn root_dir(&self, tag: u32) -> Dir {
        debug_assert!((tag as usize) < N);
        Dir::from_raw(tag)
    }

    fn child(&self, tag: u32) -> VfsResult<Vfs> {
        self.inner
            .lock()
            .get(tag as usize)
            .and_then(|slot| slot.clone())
            .ok_or(VfsError::FileNotFound)
    }

    fn child_silent(&self, tag: u32) -> Option<Vfs> {
        self.inner.lock().get(tag as usize).and_then(|slot| slot.clone())
    }

    const fn decode(handle: u32) -> (u32, u32) {
        (handle & Self::TAG_MASK, handle >> Self::INDEX_BITS)
    }

    fn encode(tag: u32, inner: u32) -> VfsResult<u32> {
        if inner >> Self::INNER_BITS != 0 {
            return Err(VfsError::Unexpected);
        }
        Ok(tag | (inner << Self::INDEX_BITS))
    }
}

impl<const N: usize> Backend for MuxFs<N> {
    fn open_dir(&self, parent: Dir, path: SafePath<'_>, opts: DirOpenOptions) -> VfsResult<Dir> {
        let (tag, inner) = Self::decode(parent.raw());
        let child = self.child(tag)?;
        let opened = child.open_dir(Dir::from_raw(inner), path, opts)?;
        Ok(Dir::from_raw(Self::encode(tag, opened.raw())?))
    }

    fn close_dir(&self, dir: Dir) {
        let (tag, inner) = Self::decode(dir.raw());
        if let Some(child) = self.child_silent(tag) {
            child.close_dir(Dir::from_raw(inner));
        }
    }

    fn delete_dir(&self, parent: Dir, path: SafePath<'_>, opts: DirDeleteOptions) -> VfsResult<()> {
        let (tag, inner) = Self::decode(parent.raw());
        self.child(tag)?.delete_dir(Dir::from_raw(inner), path, opts)
    }

    fn stat(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<Stat> {
        let (tag, inner) = Self::decode(parent.raw());
        self.child(tag)?.stat(Dir::from_raw(inner), path)
    }

    fn iter_open(&self, dir: Dir) -> VfsResult<IterId> {
        let (tag, inner) = Self::decode(dir.raw());
        let child = self.child(tag)?;
        // Forwarding goes through the child's backend directly, so the
        // facade's two duties are replayed here: the capability check, and
        // substituting the child's real root for the 0-inner sentinel.
        if !child.permissions().contains(Permissions::ITERATE) {
            return Err(VfsError::PermissionDenied);
        }
        let child_dir = if inner == 0 {
            child.current_root()
        } else {
            Dir::from_raw(inner)
        };
        let stream = child.backend().iter_open(child_dir)?;
        Ok(IterId::from_raw(Self::encode(tag, stream.raw())?))
    }

    fn iter_next(&self, iter: IterId) -> VfsResult<Option<DirEntry>> {
        let (tag, inner) = Self::decode(iter.raw());
        self.child(tag)?.backend().iter_next(IterId::from_raw(inner))
    }

    fn iter_reset(&self, iter: IterId) -> VfsResult<()> {
        let (tag, inner) = Self::decode(iter.raw());
        self.child(tag)?.backend().iter_reset(IterId::from_raw(inner))
    }

    fn iter_close(&self, iter: IterId) {
        let (tag, inner) = Self::decode(iter.raw());
        if let Some(child) = self.child_silent(tag) {
            child.backend().iter_close(IterId::from_raw(inner));
        }
    }

    fn open_file(&self, parent: Dir, path: SafePath<'_>, opts: FileOpenOptions) -> VfsResult<File> {
        let (tag, inner) = Self::decode(parent.raw());
        let child = self.child(tag)?;
        let opened = child.open_file(Dir::from_raw(inner), path, opts)?;
        Ok(File::from_raw(Self::encode(tag, opened.raw())?))
    }

    fn close_file(&self, file: File) {
        let (tag, inner) = Self::decode(file.raw());
        if let Some(child) = self.child_silent(tag) {
            child.close_file(File::from_raw(inner));
        }
    }

    fn delete_file(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<()> {
        let (tag, inner) = Self::decode(parent.raw());
        self.child(tag)?.delete_file(Dir::from_raw(inner), path)
    }

    fn seek(&self, file: File, delta: u64, whence: Whence) -> VfsResult<u64> {
        let (tag, inner) = Self::decode(file.raw());
        self.child(tag)?.seek(File::from_raw(inner), delta, whence)
    }

    fn readv(&self, file: File, bufs: &mut [IoSliceMut<'_>]) -> VfsResult<usize> {
        let (tag, inner) = Self::decode(file.raw());
        self.child(tag)?.readv(File::from_raw(inner), bufs)
    }

    fn preadv(&self, file: File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> VfsResult<usize> {
        let (tag, inner) = Self::decode(file.raw());
        self.child(tag)?.preadv(File::from_raw(inner), bufs, offset)
    }

    fn writev(&self, file: File, bufs: &[IoSlice<'_>]) -> VfsResult<usize> {
        let (tag, inner) = Self::decode(file.raw());
        self.child(tag)?.writev(File::from_raw(inner), bufs)
    }

    fn pwritev(&self, file: File, bufs: &[IoSlice<'_>], offset: u64) -> VfsResult<usize> {
        let (tag, inner) = Self::decode(file.raw());
        self.child(tag)?.pwritev(File::from_raw(inner), bufs, offset)
    }
}

//! The `Vfs` facade: capability gate, root rebinding, dispatch.

use std::io::{IoSlice, IoSliceMut};
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{VfsError, VfsResult};
use crate::iter::DirIter;
use crate::path::SafePath;
use crate::types::{
    Dir, DirDeleteOptions, DirOpenOptions, File, FileOpenOptions, Permissions, Stat, Whence,
};
use crate::walker::{SelectiveWalker, Walker};

/// A capability-controlled view over a [`Backend`].
///
/// Every operation first evaluates the relevant permission bit (failing
/// with [`VfsError::PermissionDenied`] before the backend is consulted),
/// then rebinds the root sentinel and absolute paths onto the logical root
/// installed by [`Vfs::chroot`], and finally dispatches to the backend with
/// the relative portion of the path.
///
/// `Vfs` is a cheap clone over shared state; clones address the same
/// backend and the same logical root. A single instance is not internally
/// serialized beyond its handle tables — concurrent use from multiple
/// threads needs external coordination.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<VfsInner>,
}

struct VfsInner {
    backend: Box<dyn Backend>,
    permissions: Permissions,
    /// Logical root installed by `chroot`; `Dir::ROOT` when unset.
    root: Mutex<Dir>,
}

impl Vfs {
    pub fn new(backend: impl Backend, permissions: Permissions) -> Self {
        Self {
            inner: Arc::new(VfsInner {
                backend: Box::new(backend),
                permissions,
                root: Mutex::new(Dir::ROOT),
            }),
        }
    }

    pub fn permissions(&self) -> Permissions {
        self.inner.permissions
    }

    /// The currently installed logical root (the sentinel when no chroot is
    /// in effect). Composing backends use this to forward iteration on a
    /// child's private root.
    pub fn current_root(&self) -> Dir {
        *self.inner.root.lock()
    }

    /// Raw access to the backend, for composing backends that must forward
    /// operations without allocating. Callers are responsible for honoring
    /// [`Vfs::permissions`] the way the facade would.
    pub fn backend(&self) -> &dyn Backend {
        &*self.inner.backend
    }

    /// Whether two handles address the same VFS instance.
    pub fn same_instance(&self, other: &Vfs) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn require(&self, bit: Permissions) -> VfsResult<()> {
        if self.inner.permissions.contains(bit) {
            Ok(())
        } else {
            Err(VfsError::PermissionDenied)
        }
    }

    /// Substitute the logical root for the root sentinel and for absolute
    /// paths; backends only ever see relative paths.
    fn rebind<'p>(&self, dir: Dir, path: SafePath<'p>) -> (Dir, SafePath<'p>) {
        if dir.is_root() || path.is_absolute() {
            (self.current_root(), path.relative())
        } else {
            (dir, path)
        }
    }

    pub fn open_dir(
        &self,
        dir: Dir,
        path: SafePath<'_>,
        opts: DirOpenOptions,
    ) -> VfsResult<Dir> {
        if opts.create {
            self.require(Permissions::CREATE)?;
        }
        let (dir, path) = self.rebind(dir, path);
        self.inner.backend.open_dir(dir, path, opts)
    }

    pub fn close_dir(&self, dir: Dir) {
        self.inner.backend.close_dir(dir);
    }

    pub fn delete_dir(
        &self,
        dir: Dir,
        path: SafePath<'_>,
        opts: DirDeleteOptions,
    ) -> VfsResult<()> {
        self.require(Permissions::DELETE)?;
        let (dir, path) = self.rebind(dir, path);
        self.inner.backend.delete_dir(dir, path, opts)
    }

    pub fn stat(&self, dir: Dir, path: SafePath<'_>) -> VfsResult<Stat> {
        self.require(Permissions::STAT)?;
        let (dir, path) = self.rebind(dir, path);
        self.inner.backend.stat(dir, path)
    }

    pub fn iterate(&self, dir: Dir) -> VfsResult<DirIter> {
        self.require(Permissions::ITERATE)?;
        let dir = if dir.is_root() { self.current_root() } else { dir };
        let stream = self.inner.backend.iter_open(dir)?;
        Ok(DirIter::new(self.clone(), dir, stream))
    }

    pub fn open_file(
        &self,
        dir: Dir,
        path: SafePath<'_>,
        opts: FileOpenOptions,
    ) -> VfsResult<File> {
        if opts.create {
            self.require(Permissions::CREATE)?;
        }
        if opts.mode.readable() {
            self.require(Permissions::READ)?;
        }
        if opts.mode.writable() {
            self.require(Permissions::WRITE)?;
        }
        let (dir, path) = self.rebind(dir, path);
        self.inner.backend.open_file(dir, path, opts)
    }

    pub fn close_file(&self, file: File) {
        self.inner.backend.close_file(file);
    }

    pub fn delete_file(&self, dir: Dir, path: SafePath<'_>) -> VfsResult<()> {
        self.require(Permissions::DELETE)?;
        let (dir, path) = self.rebind(dir, path);
        self.inner.backend.delete_file(dir, path)
    }

    /// Move the per-handle cursor; returns the new offset. Gated on `STAT`
    /// because end-relative seeks query the end position.
    pub fn seek(&self, file: File, delta: u64, whence: Whence) -> VfsResult<u64> {
        self.require(Permissions::STAT)?;
        self.inner.backend.seek(file, delta, whence)
    }

    pub fn readv(&self, file: File, bufs: &mut [IoSliceMut<'_>]) -> VfsResult<usize> {
        self.require(Permissions::READ)?;
        self.inner.backend.readv(file, bufs)
    }

    pub fn preadv(
        &self,
        file: File,
        bufs: &mut [IoSliceMut<'_>],
        offset: u64,
    ) -> VfsResult<usize> {
        self.require(Permissions::READ)?;
        self.inner.backend.preadv(file, bufs, offset)
    }

    pub fn writev(&self, file: File, bufs: &[IoSlice<'_>]) -> VfsResult<usize> {
        self.require(Permissions::WRITE)?;
        self.inner.backend.writev(file, bufs)
    }

    pub fn pwritev(&self, file: File, bufs: &[IoSlice<'_>], offset: u64) -> VfsResult<usize> {
        self.require(Permissions::WRITE)?;
        self.inner.backend.pwritev(file, bufs, offset)
    }

    /// Install `subpath` as the logical root for subsequent root-relative
    /// lookups. The previously installed root (if any) is closed. An empty
    /// `subpath` reverts to the sentinel.
    pub fn chroot(&self, dir: Dir, subpath: SafePath<'_>) -> VfsResult<()> {
        if subpath.is_empty() {
            let old = mem::replace(&mut *self.inner.root.lock(), Dir::ROOT);
            if !old.is_root() {
                self.inner.backend.close_dir(old);
            }
            debug!("chroot reverted to root sentinel");
            return Ok(());
        }
        let (parent, subpath) = self.rebind(dir, subpath);
        let new_root = self.inner.backend.open_dir(
            parent,
            subpath,
            DirOpenOptions {
                iterate: true,
                create: false,
            },
        )?;
        let old = mem::replace(&mut *self.inner.root.lock(), new_root);
        if !old.is_root() {
            self.inner.backend.close_dir(old);
        }
        debug!(subpath = %subpath, "chroot installed");
        Ok(())
    }

    /// Depth-first pre-order traversal of `dir`.
    pub fn walk(&self, dir: Dir) -> VfsResult<Walker> {
        Walker::new(self, dir)
    }

    /// Traversal that only descends where the caller asks it to.
    pub fn walk_selectively(&self, dir: Dir) -> VfsResult<SelectiveWalker> {
        SelectiveWalker::new(self, dir)
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("permissions", &self.inner.permissions)
            .field("root", &self.current_root())
            .finish()
    }
}

//! Overlay backend: a namespace composed of other VFSes.
//!
//! Mount points are absolute path prefixes; lookups scan them in reverse
//! insertion order, so a later mount shadows an earlier one for the paths
//! under it (mount `/a`, then `/a/b`: paths below `/a/b` route to the
//! second child). Every handle the overlay hands out records which child
//! it came from, so the child handle can be closed when the overlay handle
//! is, or when the child is unmounted.
//!
//! The overlay holds its children by shared reference and never ends their
//! lifetimes; callers release children after the overlay.

use std::collections::HashMap;
use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use harha_core::{
    Backend, Dir, DirDeleteOptions, DirEntry, DirIter, DirOpenOptions, File, FileOpenOptions,
    IterId, SafePath, Stat, Vfs, VfsError, VfsResult, Whence,
};

#[derive(Clone, Default)]
pub struct OverlayFs {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

struct State {
    /// Insertion-ordered; routing scans it back to front.
    mounts: Vec<(String, Vfs)>,
    dirs: HashMap<u32, DirState>,
    files: HashMap<u32, FileState>,
    iters: HashMap<u32, DirIter>,
    next_dir: u32,
    next_file: u32,
    next_iter: u32,
}

impl Default for State {
    fn default() -> Self {
        Self {
            mounts: Vec::new(),
            dirs: HashMap::new(),
            files: HashMap::new(),
            iters: HashMap::new(),
            next_dir: 1,
            next_file: 0,
            next_iter: 0,
        }
    }
}

struct DirState {
    child: Vfs,
    child_dir: Dir,
    /// Composed absolute path of this directory in the overlay namespace.
    path: String,
}

struct FileState {
    child: Vfs,
    child_file: File,
}

impl OverlayFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `fs` at `path` (absolute). A child can be mounted only once:
    /// the overlay attributes every handle back to a mount for cleanup,
    /// which a doubly mounted child would make ambiguous.
    pub fn mount(&self, fs: &Vfs, path: &str) -> VfsResult<()> {
        if path.is_empty() || !path.starts_with('/') {
            return Err(VfsError::InvalidPath);
        }
        let mut state = self.inner.state.lock();
        if state.mounts.iter().any(|(_, child)| child.same_instance(fs)) {
            return Err(VfsError::PathAlreadyExists);
        }
        if state.mounts.iter().any(|(mount, _)| mount == path) {
            return Err(VfsError::PathAlreadyExists);
        }
        state.mounts.push((path.to_string(), fs.clone()));
        debug!(path, "overlay mount");
        Ok(())
    }

    /// Detach the mount at `path`, closing every live overlay handle that
    /// belongs to the detached child (newest first).
    pub fn unmount(&self, path: &str) -> VfsResult<()> {
        let mut state = self.inner.state.lock();
        let pos = state
            .mounts
            .iter()
            .position(|(mount, _)| mount == path)
            .ok_or(VfsError::FileNotFound)?;
        let (_, child) = state.mounts.remove(pos);

        let mut dir_ids: Vec<u32> = state
            .dirs
            .iter()
            .filter(|(_, dir)| dir.child.same_instance(&child))
            .map(|(id, _)| *id)
            .collect();
        dir_ids.sort_unstable_by(|a, b| b.cmp(a));
        for id in dir_ids {
            if let Some(dir) = state.dirs.remove(&id) {
                dir.child.close_dir(dir.child_dir);
            }
        }

        let mut file_ids: Vec<u32> = state
            .files
            .iter()
            .filter(|(_, file)| file.child.same_instance(&child))
            .map(|(id, _)| *id)
            .collect();
        file_ids.sort_unstable_by(|a, b| b.cmp(a));
        for id in file_ids {
            if let Some(file) = state.files.remove(&id) {
                file.child.close_file(file.child_file);
            }
        }

        state
            .iters
            .retain(|_, iter| !iter.vfs().same_instance(&child));

        debug!(path, "overlay unmount");
        Ok(())
    }

    /// Longest-prefix routing over the mount table: the most recently
    /// inserted matching mount wins.
    fn route(state: &State, full: &str) -> VfsResult<(Vfs, String)> {
        for (mount, child) in state.mounts.iter().rev() {
            if let Some(rest) = full.strip_prefix(mount.as_str()) {
                let rest = rest.strip_prefix('/').unwrap_or(rest);
                return Ok((child.clone(), rest.to_string()));
            }
        }
        Err(VfsError::FileNotFound)
    }

    fn parent_path(state: &State, parent: Dir) -> VfsResult<String> {
        if parent.is_root() {
            Ok(String::new())
        } else {
            state
                .dirs
                .get(&parent.raw())
                .map(|dir| dir.path.clone())
                .ok_or(VfsError::FileNotFound)
        }
    }

    fn compose(parent_path: &str, sub: SafePath<'_>) -> String {
        if sub.is_empty() {
            parent_path.to_string()
        } else {
            format!("{}/{}", parent_path, sub.as_str())
        }
    }

    /// Compose the full overlay path for `(parent, sub)` and route it.
    fn resolve(
        &self,
        parent: Dir,
        sub: SafePath<'_>,
    ) -> VfsResult<(Vfs, String, String)> {
        let state = self.inner.state.lock();
        let full = Self::compose(&Self::parent_path(&state, parent)?, sub);
        let (child, rest) = Self::route(&state, &full)?;
        Ok((child, rest, full))
    }
}

impl Backend for OverlayFs {
    fn open_dir(&self, parent: Dir, path: SafePath<'_>, opts: DirOpenOptions) -> VfsResult<Dir> {
        let (child, rest, full) = self.resolve(parent, path)?;
        let child_dir = child.open_dir(Dir::ROOT, SafePath::new(&rest)?, opts)?;
        let mut state = self.inner.state.lock();
        let state = &mut *state;
        let id = alloc_id(&mut state.next_dir, |id| !state.dirs.contains_key(id), 1);
        state.dirs.insert(
            id,
            DirState {
                child,
                child_dir,
                path: full,
            },
        );
        trace!(id, "overlay dir opened");
        Ok(Dir::from_raw(id))
    }

    fn close_dir(&self, dir: Dir) {
        if dir.is_root() {
            return;
        }
        let removed = self.inner.state.lock().dirs.remove(&dir.raw());
        if let Some(dir) = removed {
            dir.child.close_dir(dir.child_dir);
        }
    }

    fn delete_dir(&self, parent: Dir, path: SafePath<'_>, opts: DirDeleteOptions) -> VfsResult<()> {
        let (child, rest, _) = self.resolve(parent, path)?;
        child.delete_dir(Dir::ROOT, SafePath::new(&rest)?, opts)
    }

    fn stat(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<Stat> {
        let (child, rest, _) = self.resolve(parent, path)?;
        child.stat(Dir::ROOT, SafePath::new(&rest)?)
    }

    fn iter_open(&self, dir: Dir) -> VfsResult<IterId> {
        let (child, child_dir) = {
            let state = self.inner.state.lock();
            let dir_state = state.dirs.get(&dir.raw()).ok_or(VfsError::FileNotFound)?;
            (dir_state.child.clone(), dir_state.child_dir)
        };
        // The child holder carries its own capability set; its facade is
        // what enforces it.
        let iter = child.iterate(child_dir)?;
        let mut state = self.inner.state.lock();
        let state = &mut *state;
        let id = alloc_id(&mut state.next_iter, |id| !state.iters.contains_key(id), 0);
        state.iters.insert(id, iter);
        Ok(IterId::from_raw(id))
    }

    fn iter_next(&self, iter: IterId) -> VfsResult<Option<DirEntry>> {
        let mut state = self.inner.state.lock();
        state
            .iters
            .get_mut(&iter.raw())
            .ok_or(VfsError::NotOpenForIteration)?
            .next()
    }

    fn iter_reset(&self, iter: IterId) -> VfsResult<()> {
        let mut state = self.inner.state.lock();
        state
            .iters
            .get_mut(&iter.raw())
            .ok_or(VfsError::NotOpenForIteration)?
            .reset()
    }

    fn iter_close(&self, iter: IterId) {
        self.inner.state.lock().iters.remove(&iter.raw());
    }

    fn open_file(&self, parent: Dir, path: SafePath<'_>, opts: FileOpenOptions) -> VfsResult<File> {
        let (child, rest, _) = self.resolve(parent, path)?;
        let child_file = child.open_file(Dir::ROOT, SafePath::new(&rest)?, opts)?;
        let mut state = self.inner.state.lock();
        let state = &mut *state;
        let id = alloc_id(&mut state.next_file, |id| !state.files.contains_key(id), 0);
        state.files.insert(id, FileState { child, child_file });
        Ok(File::from_raw(id))
    }

    fn close_file(&self, file: File) {
        let removed = self.inner.state.lock().files.remove(&file.raw());
        if let Some(file) = removed {
            file.child.close_file(file.child_file);
        }
    }

    fn delete_file(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<()> {
        let (child, rest, _) = self.resolve(parent, path)?;
        child.delete_file(Dir::ROOT, SafePath::new(&rest)?)
    }

    fn seek(&self, file: File, delta: u64, whence: Whence) -> VfsResult<u64> {
        let (child, child_file) = self.file_target(file)?;
        child.seek(child_file, delta, whence)
    }

    fn readv(&self, file: File, bufs: &mut [IoSliceMut<'_>]) -> VfsResult<usize> {
        let (child, child_file) = self.file_target(file)?;
        child.readv(child_file, bufs)
    }

    fn preadv(&self, file: File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> VfsResult<usize> {
        let (child, child_file) = self.file_target(file)?;
        child.preadv(child_file, bufs, offset)
    }

    fn writev(&self, file: File, bufs: &[IoSlice<'_>]) -> VfsResult<usize> {
        let (child, child_file) = self.file_target(file)?;
        child.writev(child_file, bufs)
    }

    fn pwritev(&self, file: File, bufs: &[IoSlice<'_>], offset: u64) -> VfsResult<usize> {
        let (child, child_file) = self.file_target(file)?;
        child.pwritev(child_file, bufs, offset)
    }
}

impl OverlayFs {
    fn file_target(&self, file: File) -> VfsResult<(Vfs, File)> {
        let state = self.inner.state.lock();
        let file_state = state.files.get(&file.raw()).ok_or(VfsError::FileNotFound)?;
        Ok((file_state.child.clone(), file_state.child_file))
    }
}

fn alloc_id(next: &mut u32, free: impl Fn(&u32) -> bool, min: u32) -> u32 {
    loop {
        let id = *next;
        *next = if id == u32::MAX { min } else { id + 1 };
        if id >= min && free(&id) {
            return id;
        }
    }
}

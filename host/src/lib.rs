//! Passthrough backend over a host directory tree.
//!
//! Handles map to host state through two tables: directory handles carry
//! the resolved host path, file handles carry an open host file plus the
//! per-handle cursor. Handle ids come from the backend's own counters
//! rather than host descriptor values, so the root sentinel can never
//! collide with a real handle.

mod sys;

use std::collections::HashMap;
use std::fs;
use std::io::{IoSlice, IoSliceMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use harha_core::{
    Backend, Dir, DirDeleteOptions, DirEntry, DirOpenOptions, File, FileOpenOptions, IterId, Mode,
    SafePath, Stat, VfsError, VfsResult, Whence,
};

/// Scatter/gather calls hand the host at most this many buffers at a time.
const IOV_BATCH: usize = 16;

/// Backend that serves a subtree of the host filesystem.
#[derive(Clone)]
pub struct PassthroughFs {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    dirs: HashMap<u32, PathBuf>,
    files: HashMap<u32, FileState>,
    iters: HashMap<u32, IterState>,
    next_dir: u32,
    next_file: u32,
    next_iter: u32,
}

struct FileState {
    file: fs::File,
    cursor: u64,
    mode: Mode,
}

struct IterState {
    path: PathBuf,
    entries: fs::ReadDir,
}

impl PassthroughFs {
    /// Serve `root`, which must name an existing host directory.
    pub fn new(root: impl Into<PathBuf>) -> VfsResult<Self> {
        let root = root.into();
        let md = sys::io_result("passthrough.new", fs::metadata(&root))?;
        if !md.is_dir() {
            return Err(VfsError::NotDir);
        }
        trace!(root = %root.display(), "passthrough backend opened");
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                state: Mutex::new(State {
                    next_dir: 1,
                    ..State::default()
                }),
            }),
        })
    }

    /// Serve `subpath` under `host_dir`. The resolved root belongs to this
    /// backend and is released with it.
    pub fn open_path(host_dir: &Path, subpath: SafePath<'_>) -> VfsResult<Self> {
        Self::new(join(host_dir, subpath.relative()))
    }

    fn resolve_dir(&self, state: &State, dir: Dir) -> VfsResult<PathBuf> {
        if dir.is_root() {
            Ok(self.inner.root.clone())
        } else {
            state
                .dirs
                .get(&dir.raw())
                .cloned()
                .ok_or(VfsError::FileNotFound)
        }
    }

    fn resolve(&self, state: &State, parent: Dir, path: SafePath<'_>) -> VfsResult<PathBuf> {
        Ok(join(&self.resolve_dir(state, parent)?, path))
    }
}

fn join(base: &Path, path: SafePath<'_>) -> PathBuf {
    if path.is_empty() {
        base.to_path_buf()
    } else {
        base.join(path.as_str())
    }
}

fn alloc_dir_id(state: &mut State) -> u32 {
    loop {
        let id = state.next_dir;
        state.next_dir = if id == u32::MAX { 1 } else { id + 1 };
        if !state.dirs.contains_key(&id) {
            return id;
        }
    }
}

fn alloc_file_id(state: &mut State) -> u32 {
    loop {
        let id = state.next_file;
        state.next_file = id.wrapping_add(1);
        if !state.files.contains_key(&id) {
            return id;
        }
    }
}

fn alloc_iter_id(state: &mut State) -> u32 {
    loop {
        let id = state.next_iter;
        state.next_iter = id.wrapping_add(1);
        if !state.iters.contains_key(&id) {
            return id;
        }
    }
}

/// Read the next acceptable entry from a live host directory stream.
///
/// Entries whose names fail path validation are skipped, as are entries
/// that vanish between listing and stat (concurrent mutation).
fn next_entry(entries: &mut fs::ReadDir) -> VfsResult<Option<DirEntry>> {
    loop {
        let entry = match entries.next() {
            None => return Ok(None),
            Some(entry) => sys::io_result("passthrough.iterate.next", entry)?,
        };
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if SafePath::new(&name).is_err() {
            continue;
        }
        match sys::stat_path(&entry.path()) {
            Ok(stat) => {
                return Ok(Some(DirEntry {
                    basename: name,
                    stat,
                }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(sys::map_io_error("passthrough.iterate.stat", err)),
        }
    }
}

impl Backend for PassthroughFs {
    fn open_dir(&self, parent: Dir, path: SafePath<'_>, opts: DirOpenOptions) -> VfsResult<Dir> {
        let mut state = self.inner.state.lock();
        let full = self.resolve(&state, parent, path)?;
        if opts.create {
            sys::io_result("passthrough.open_dir.create", fs::create_dir_all(&full))?;
        }
        let md = sys::io_result("passthrough.open_dir.stat", fs::metadata(&full))?;
        if !md.is_dir() {
            return Err(VfsError::NotDir);
        }
        let id = alloc_dir_id(&mut state);
        state.dirs.insert(id, full);
        Ok(Dir::from_raw(id))
    }

    fn close_dir(&self, dir: Dir) {
        if dir.is_root() {
            return;
        }
        self.inner.state.lock().dirs.remove(&dir.raw());
    }

    fn delete_dir(&self, parent: Dir, path: SafePath<'_>, opts: DirDeleteOptions) -> VfsResult<()> {
        let full = {
            let state = self.inner.state.lock();
            self.resolve(&state, parent, path)?
        };
        if opts.recursive {
            sys::io_result("passthrough.delete_dir.tree", fs::remove_dir_all(&full))
        } else {
            sys::io_result("passthrough.delete_dir", fs::remove_dir(&full))
        }
    }

    fn stat(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<Stat> {
        let full = {
            let state = self.inner.state.lock();
            self.resolve(&state, parent, path)?
        };
        sys::io_result("passthrough.stat", sys::stat_path(&full))
    }

    fn iter_open(&self, dir: Dir) -> VfsResult<IterId> {
        let mut state = self.inner.state.lock();
        let path = self.resolve_dir(&state, dir)?;
        let entries = sys::io_result("passthrough.iterate.open", fs::read_dir(&path))?;
        let id = alloc_iter_id(&mut state);
        state.iters.insert(id, IterState { path, entries });
        Ok(IterId::from_raw(id))
    }

    fn iter_next(&self, iter: IterId) -> VfsResult<Option<DirEntry>> {
        let mut state = self.inner.state.lock();
        let iter_state = state
            .iters
            .get_mut(&iter.raw())
            .ok_or(VfsError::NotOpenForIteration)?;
        next_entry(&mut iter_state.entries)
    }

    fn iter_reset(&self, iter: IterId) -> VfsResult<()> {
        let mut state = self.inner.state.lock();
        let iter_state = state
            .iters
            .get_mut(&iter.raw())
            .ok_or(VfsError::NotOpenForIteration)?;
        iter_state.entries =
            sys::io_result("passthrough.iterate.reset", fs::read_dir(&iter_state.path))?;
        Ok(())
    }

    fn iter_close(&self, iter: IterId) {
        self.inner.state.lock().iters.remove(&iter.raw());
    }

    fn open_file(&self, parent: Dir, path: SafePath<'_>, opts: FileOpenOptions) -> VfsResult<File> {
        let mut state = self.inner.state.lock();
        let full = self.resolve(&state, parent, path)?;
        let file = sys::io_result(
            "passthrough.open_file",
            fs::OpenOptions::new()
                .read(opts.mode.readable())
                .write(opts.mode.writable() || opts.create)
                .create(opts.create)
                .open(&full),
        )?;
        let md = sys::io_result("passthrough.open_file.stat", file.metadata())?;
        if md.is_dir() {
            return Err(VfsError::IsDir);
        }
        let id = alloc_file_id(&mut state);
        state.files.insert(
            id,
            FileState {
                file,
                cursor: 0,
                mode: opts.mode,
            },
        );
        Ok(File::from_raw(id))
    }

    fn close_file(&self, file: File) {
        self.inner.state.lock().files.remove(&file.raw());
    }

    fn delete_file(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<()> {
        let full = {
            let state = self.inner.state.lock();
            self.resolve(&state, parent, path)?
        };
        sys::io_result("passthrough.delete_file", fs::remove_file(&full))
    }

    fn seek(&self, file: File, delta: u64, whence: Whence) -> VfsResult<u64> {
        let mut state = self.inner.state.lock();
        let file_state = state
            .files
            .get_mut(&file.raw())
            .ok_or(VfsError::FileNotFound)?;
        let cursor = match whence {
            Whence::Set => delta,
            Whence::Forward => file_state.cursor.saturating_add(delta),
            Whence::Backward => file_state.cursor.saturating_sub(delta),
            Whence::FromEnd => {
                let end = sys::io_result("passthrough.seek.end", file_state.file.metadata())?.len();
                end.saturating_sub(delta)
            }
        };
        file_state.cursor = cursor;
        Ok(cursor)
    }

    fn readv(&self, file: File, bufs: &mut [IoSliceMut<'_>]) -> VfsResult<usize> {
        let mut state = self.inner.state.lock();
        let file_state = state
            .files
            .get_mut(&file.raw())
            .ok_or(VfsError::FileNotFound)?;
        if !file_state.mode.readable() {
            return Err(VfsError::NotOpenForReading);
        }
        let start = file_state.cursor;
        let total = read_batches(&file_state.file, bufs, start)?;
        file_state.cursor = start + total as u64;
        Ok(total)
    }

    fn preadv(&self, file: File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> VfsResult<usize> {
        let state = self.inner.state.lock();
        let file_state = state.files.get(&file.raw()).ok_or(VfsError::FileNotFound)?;
        if !file_state.mode.readable() {
            return Err(VfsError::NotOpenForReading);
        }
        read_batches(&file_state.file, bufs, offset)
    }

    fn writev(&self, file: File, bufs: &[IoSlice<'_>]) -> VfsResult<usize> {
        let mut state = self.inner.state.lock();
        let file_state = state
            .files
            .get_mut(&file.raw())
            .ok_or(VfsError::FileNotFound)?;
        if !file_state.mode.writable() {
            return Err(VfsError::NotOpenForWriting);
        }
        let start = file_state.cursor;
        let total = write_batches(&file_state.file, bufs, start)?;
        file_state.cursor = start + total as u64;
        Ok(total)
    }

    fn pwritev(&self, file: File, bufs: &[IoSlice<'_>], offset: u64) -> VfsResult<usize> {
        let state = self.inner.state.lock();
        let file_state = state.files.get(&file.raw()).ok_or(VfsError::FileNotFound)?;
        if !file_state.mode.writable() {
            return Err(VfsError::NotOpenForWriting);
        }
        write_batches(&file_state.file, bufs, offset)
    }
}

/// Run scatter reads in iovec batches, returning early on a short batch.
fn read_batches(file: &fs::File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> VfsResult<usize> {
    let mut total = 0usize;
    for batch in bufs.chunks_mut(IOV_BATCH) {
        let want: usize = batch.iter().map(|buf| buf.len()).sum();
        let n = sys::io_result(
            "passthrough.readv",
            sys::preadv(file, batch, offset + total as u64),
        )?;
        total += n;
        if n < want {
            break;
        }
    }
    Ok(total)
}

/// Run gather writes in iovec batches, returning early on a short batch.
fn write_batches(file: &fs::File, bufs: &[IoSlice<'_>], offset: u64) -> VfsResult<usize> {
    let mut total = 0usize;
    for batch in bufs.chunks(IOV_BATCH) {
        let want: usize = batch.iter().map(|buf| buf.len()).sum();
        let n = sys::io_result(
            "passthrough.writev",
            sys::pwritev(file, batch, offset + total as u64),
        )?;
        total += n;
        if n < want {
            break;
        }
    }
    Ok(total)
}

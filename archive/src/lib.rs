//! Read-only backend over an archive file.
//!
//! Init parses the archive tables once into an insertion-ordered path
//! index (directories are synthesized from file-path prefixes; the empty
//! path is the archive root) and afterwards serves everything from that
//! index plus positional reads into the backing file. Handles pack the
//! entry kind, the index slot and a generation counter into 32 bits, so
//! reopening a path always yields a different handle value.

mod format;
mod io;

pub use format::{ArchiveBuilder, Index, ParseError, RawEntry};

use std::collections::HashMap;
use std::fs;
use std::io::IoSliceMut;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{trace, warn};

use harha_core::{
    Backend, Dir, DirEntry, DirOpenOptions, File, FileOpenOptions, IterId, Kind, SafePath, Stat,
    VfsError, VfsResult, Whence,
};

/// Handle layout, low bits first: 1 kind bit (0 = dir, 1 = file),
/// 20 path-index bits, 11 generation bits. The all-zero value is the
/// archive root.
const KIND_BITS: u32 = 1;
const INDEX_BITS: u32 = 20;
const GEN_BITS: u32 = 11;
const KIND_FILE: u32 = 1;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GEN_MASK: u32 = (1 << GEN_BITS) - 1;

/// Scatter reads hand the host at most this many buffers at a time.
const IOV_BATCH: usize = 16;

#[derive(Clone)]
pub struct ArchiveFs {
    inner: Arc<Inner>,
}

struct Inner {
    file: fs::File,
    /// Insertion-ordered path index; slot 0 is the archive root.
    entries: Vec<IndexEntry>,
    lookup: HashMap<String, u32>,
    state: Mutex<State>,
}

struct IndexEntry {
    path: String,
    stat: Stat,
    data_off: u64,
}

#[derive(Default)]
struct State {
    files: HashMap<u32, FileState>,
    iters: HashMap<u32, IterState>,
    next_gen: u32,
    next_iter: u32,
}

struct FileState {
    entry: u32,
    cursor: u64,
}

struct IterState {
    entries: Vec<DirEntry>,
    pos: usize,
}

const fn encode(kind: u32, index: u32, gen: u32) -> u32 {
    kind | (index << KIND_BITS) | (gen << (KIND_BITS + INDEX_BITS))
}

const fn decode(handle: u32) -> (u32, u32, u32) {
    (
        handle & ((1 << KIND_BITS) - 1),
        (handle >> KIND_BITS) & INDEX_MASK,
        (handle >> (KIND_BITS + INDEX_BITS)) & GEN_MASK,
    )
}

fn dir_stat() -> Stat {
    Stat {
        kind: Kind::Dir,
        size: 0,
        mtime: 0,
        ctime: 0,
    }
}

impl ArchiveFs {
    /// Parse `file` and build the path index. The file stays open for the
    /// backend's lifetime; all reads against it are positional.
    pub fn new(file: fs::File) -> VfsResult<Self> {
        let index = format::read_index(&file).map_err(|err| {
            warn!(%err, "archive rejected");
            match err {
                ParseError::Io(io_err) => VfsError::from(io_err),
                _ => VfsError::Unexpected,
            }
        })?;

        let mut entries = vec![IndexEntry {
            path: String::new(),
            stat: dir_stat(),
            data_off: 0,
        }];
        let mut lookup = HashMap::new();
        lookup.insert(String::new(), 0u32);

        for raw in index.entries() {
            let path = index.path(raw).to_string();
            let stat = Stat {
                kind: Kind::File,
                size: raw.size,
                mtime: raw.mtime_ns as i128,
                ctime: raw.mtime_ns as i128,
            };
            match lookup.get(&path) {
                Some(&slot) => {
                    // Append-only container: a later record supersedes an
                    // earlier one for the same path.
                    entries[slot as usize].stat = stat;
                    entries[slot as usize].data_off = raw.data_off;
                }
                None => {
                    push_entry(&mut entries, &mut lookup, path, stat, raw.data_off)?;
                }
            }
        }

        let file_paths: Vec<String> = entries[1..]
            .iter()
            .map(|entry| entry.path.clone())
            .collect();
        for path in &file_paths {
            for (pos, _) in path.match_indices('/') {
                let prefix = &path[..pos];
                if !lookup.contains_key(prefix) {
                    push_entry(&mut entries, &mut lookup, prefix.to_string(), dir_stat(), 0)?;
                }
            }
        }

        trace!(entries = entries.len(), "archive index built");
        Ok(Self {
            inner: Arc::new(Inner {
                file,
                entries,
                lookup,
                state: Mutex::new(State::default()),
            }),
        })
    }

    /// Open the archive at `subpath` under `host_dir`.
    pub fn open_path(host_dir: &Path, subpath: SafePath<'_>) -> VfsResult<Self> {
        let full = host_dir.join(subpath.relative().as_str());
        let file = io::io_result("archive.open_path", fs::File::open(full))?;
        Self::new(file)
    }

    fn next_gen(&self) -> u32 {
        let mut state = self.inner.state.lock();
        let gen = state.next_gen;
        state.next_gen = (gen + 1) & GEN_MASK;
        gen
    }

    /// Resolve a directory handle to its index slot.
    fn resolve_dir(&self, dir: Dir) -> VfsResult<u32> {
        let (kind, index, _) = decode(dir.raw());
        if kind == KIND_FILE {
            return Err(VfsError::NotDir);
        }
        let entry = self
            .inner
            .entries
            .get(index as usize)
            .ok_or(VfsError::FileNotFound)?;
        if entry.stat.kind != Kind::Dir {
            return Err(VfsError::FileNotFound);
        }
        Ok(index)
    }

    fn compound(&self, parent: u32, sub: SafePath<'_>) -> String {
        let parent = &self.inner.entries[parent as usize].path;
        if sub.is_empty() {
            parent.clone()
        } else if parent.is_empty() {
            sub.as_str().to_string()
        } else {
            format!("{}/{}", parent, sub.as_str())
        }
    }

    fn lookup(&self, parent: u32, sub: SafePath<'_>) -> VfsResult<u32> {
        let full = self.compound(parent, sub);
        self.inner
            .lookup
            .get(&full)
            .copied()
            .ok_or(VfsError::FileNotFound)
    }

    /// Scatter-read at `offset` within the entry's data, clamped to the
    /// bytes that remain, in batches of at most [`IOV_BATCH`] buffers.
    fn read_clamped(
        &self,
        entry: &IndexEntry,
        bufs: &mut [IoSliceMut<'_>],
        offset: u64,
    ) -> VfsResult<usize> {
        let mut left = usize::try_from(entry.stat.size.saturating_sub(offset))
            .unwrap_or(usize::MAX);
        let mut total = 0usize;
        'batches: for chunk in bufs.chunks_mut(IOV_BATCH) {
            let mut batch: SmallVec<[IoSliceMut<'_>; IOV_BATCH]> = SmallVec::new();
            for buf in chunk.iter_mut() {
                if left == 0 {
                    break;
                }
                let take = buf.len().min(left);
                left -= take;
                batch.push(IoSliceMut::new(&mut buf[..take]));
            }
            if batch.is_empty() {
                break 'batches;
            }
            let want: usize = batch.iter().map(|buf| buf.len()).sum();
            let read_at = entry.data_off + offset + total as u64;
            let n = io::io_result(
                "archive.read",
                io::preadv(&self.inner.file, &mut batch, read_at),
            )?;
            total += n;
            if n < want {
                break;
            }
        }
        Ok(total)
    }
}

impl Backend for ArchiveFs {
    fn open_dir(&self, parent: Dir, path: SafePath<'_>, opts: DirOpenOptions) -> VfsResult<Dir> {
        if opts.create {
            return Err(VfsError::PermissionDenied);
        }
        let parent = self.resolve_dir(parent)?;
        let index = self.lookup(parent, path)?;
        if self.inner.entries[index as usize].stat.kind != Kind::Dir {
            return Err(VfsError::NotDir);
        }
        Ok(Dir::from_raw(encode(0, index, self.next_gen())))
    }

    fn stat(&self, parent: Dir, path: SafePath<'_>) -> VfsResult<Stat> {
        let parent = self.resolve_dir(parent)?;
        let index = self.lookup(parent, path)?;
        Ok(self.inner.entries[index as usize].stat)
    }

    fn iter_open(&self, dir: Dir) -> VfsResult<IterId> {
        let parent = self.resolve_dir(dir)?;
        let parent_path = self.inner.entries[parent as usize].path.as_str();
        let mut entries = Vec::new();
        for entry in &self.inner.entries {
            let path = entry.path.as_str();
            let basename = if parent_path.is_empty() {
                if path.is_empty() || path.contains('/') {
                    continue;
                }
                path
            } else {
                let Some(tail) = path
                    .strip_prefix(parent_path)
                    .and_then(|tail| tail.strip_prefix('/'))
                else {
                    continue;
                };
                if tail.is_empty() || tail.contains('/') {
                    continue;
                }
                tail
            };
            entries.push(DirEntry {
                basename: basename.to_string(),
                stat: entry.stat,
            });
        }
        let mut state = self.inner.state.lock();
        let id = state.next_iter;
        state.next_iter = state.next_iter.wrapping_add(1);
        state.iters.insert(id, IterState { entries, pos: 0 });
        Ok(IterId::from_raw(id))
    }

    fn iter_next(&self, iter: IterId) -> VfsResult<Option<DirEntry>> {
        let mut state = self.inner.state.lock();
        let iter_state = state
            .iters
            .get_mut(&iter.raw())
            .ok_or(VfsError::NotOpenForIteration)?;
        let entry = iter_state.entries.get(iter_state.pos).cloned();
        if entry.is_some() {
            iter_state.pos += 1;
        }
        Ok(entry)
    }

    fn iter_reset(&self, iter: IterId) -> VfsResult<()> {
        let mut state = self.inner.state.lock();
        let iter_state = state
            .iters
            .get_mut(&iter.raw())
            .ok_or(VfsError::NotOpenForIteration)?;
        iter_state.pos = 0;
        Ok(())
    }

    fn iter_close(&self, iter: IterId) {
        self.inner.state.lock().iters.remove(&iter.raw());
    }

    fn open_file(&self, parent: Dir, path: SafePath<'_>, opts: FileOpenOptions) -> VfsResult<File> {
        if opts.create || opts.mode.writable() {
            return Err(VfsError::PermissionDenied);
        }
        let parent = self.resolve_dir(parent)?;
        let index = self.lookup(parent, path)?;
        if self.inner.entries[index as usize].stat.kind == Kind::Dir {
            return Err(VfsError::IsDir);
        }
        let handle = encode(KIND_FILE, index, self.next_gen());
        self.inner.state.lock().files.insert(
            handle,
            FileState {
                entry: index,
                cursor: 0,
            },
        );
        Ok(File::from_raw(handle))
    }

    fn close_file(&self, file: File) {
        self.inner.state.lock().files.remove(&file.raw());
    }

    fn seek(&self, file: File, delta: u64, whence: Whence) -> VfsResult<u64> {
        let mut state = self.inner.state.lock();
        let file_state = state
            .files
            .get_mut(&file.raw())
            .ok_or(VfsError::FileNotFound)?;
        let size = self.inner.entries[file_state.entry as usize].stat.size;
        let cursor = match whence {
            Whence::Set => delta,
            Whence::Forward => file_state.cursor.saturating_add(delta),
            Whence::Backward => file_state.cursor.saturating_sub(delta),
            Whence::FromEnd => size.saturating_sub(delta),
        };
        file_state.cursor = cursor;
        Ok(cursor)
    }

    fn readv(&self, file: File, bufs: &mut [IoSliceMut<'_>]) -> VfsResult<usize> {
        let (entry_index, cursor) = {
            let state = self.inner.state.lock();
            let file_state = state.files.get(&file.raw()).ok_or(VfsError::FileNotFound)?;
            (file_state.entry, file_state.cursor)
        };
        let total =
            self.read_clamped(&self.inner.entries[entry_index as usize], bufs, cursor)?;
        let mut state = self.inner.state.lock();
        if let Some(file_state) = state.files.get_mut(&file.raw()) {
            file_state.cursor = cursor + total as u64;
        }
        Ok(total)
    }

    fn preadv(&self, file: File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> VfsResult<usize> {
        let entry_index = {
            let state = self.inner.state.lock();
            state
                .files
                .get(&file.raw())
                .ok_or(VfsError::FileNotFound)?
                .entry
        };
        self.read_clamped(&self.inner.entries[entry_index as usize], bufs, offset)
    }
}

fn push_entry(
    entries: &mut Vec<IndexEntry>,
    lookup: &mut HashMap<String, u32>,
    path: String,
    stat: Stat,
    data_off: u64,
) -> VfsResult<()> {
    let slot = u32::try_from(entries.len()).map_err(|_| VfsError::ResourceLimitReached)?;
    if slot > INDEX_MASK {
        return Err(VfsError::ResourceLimitReached);
    }
    lookup.insert(path.clone(), slot);
    entries.push(IndexEntry {
        path,
        stat,
        data_off,
    });
    Ok(())
}

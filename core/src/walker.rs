//! Depth-first traversal built on directory iteration.

use crate::error::{VfsError, VfsResult};
use crate::iter::DirIter;
use crate::path::SafePath;
use crate::types::{Dir, DirOpenOptions, Kind, Stat};
use crate::vfs::Vfs;

/// One emitted traversal entry.
///
/// `basename` and `path` borrow the walker's internal name buffer and are
/// invalidated by the next call on the walker.
#[derive(Debug)]
pub struct WalkEntry<'w> {
    /// The directory the entry was found in.
    pub dir: Dir,
    pub basename: &'w str,
    /// Path relative to the directory the walk started at.
    pub path: &'w str,
    pub stat: Stat,
    /// Number of `/` in `path`, plus one.
    pub depth: usize,
}

struct Frame {
    iter: DirIter,
    /// Length of the name-buffer prefix naming this frame's directory.
    dirname_len: usize,
    /// Whether the walker opened this directory itself. The starting
    /// directory stays owned by the caller.
    owns_dir: bool,
}

struct Advance {
    parent: Dir,
    stat: Stat,
    basename_len: usize,
    is_dir: bool,
}

/// Frame stack and name buffer shared by both walker flavors.
struct Frames {
    vfs: Vfs,
    stack: Vec<Frame>,
    path: String,
}

impl Frames {
    fn open(vfs: &Vfs, dir: Dir) -> VfsResult<Self> {
        let iter = vfs.iterate(dir)?;
        Ok(Self {
            vfs: vfs.clone(),
            stack: vec![Frame {
                iter,
                dirname_len: 0,
                owns_dir: false,
            }],
            path: String::new(),
        })
    }

    /// Yield the next entry, descending into directories when
    /// `auto_descend` is set. An exhausted frame is popped and its
    /// resources closed; an erroring frame is popped the same way and the
    /// error surfaced, so a later call resumes at the parent.
    fn advance(&mut self, auto_descend: bool) -> VfsResult<Option<Advance>> {
        loop {
            let (parent, item) = match self.stack.last_mut() {
                None => return Ok(None),
                Some(top) => {
                    self.path.truncate(top.dirname_len);
                    (top.iter.dir(), top.iter.next())
                }
            };
            match item {
                Ok(Some(entry)) => {
                    if !self.path.is_empty() {
                        self.path.push('/');
                    }
                    self.path.push_str(&entry.basename);
                    let is_dir = entry.stat.kind == Kind::Dir;
                    if auto_descend && is_dir {
                        self.push_child(parent, &entry.basename)?;
                    }
                    return Ok(Some(Advance {
                        parent,
                        stat: entry.stat,
                        basename_len: entry.basename.len(),
                        is_dir,
                    }));
                }
                Ok(None) => self.pop(),
                Err(err) => {
                    self.pop();
                    return Err(err);
                }
            }
        }
    }

    fn push_child(&mut self, parent: Dir, basename: &str) -> VfsResult<()> {
        let child = self.vfs.open_dir(
            parent,
            SafePath::new(basename)?,
            DirOpenOptions {
                iterate: true,
                create: false,
            },
        )?;
        let iter = match self.vfs.iterate(child) {
            Ok(iter) => iter,
            Err(err) => {
                self.vfs.close_dir(child);
                return Err(err);
            }
        };
        self.stack.push(Frame {
            iter,
            dirname_len: self.path.len(),
            owns_dir: true,
        });
        Ok(())
    }

    fn pop(&mut self) {
        if let Some(frame) = self.stack.pop() {
            if frame.owns_dir {
                frame.iter.close_with_dir();
            } else {
                frame.iter.close();
            }
        }
    }

    fn emit(&self, adv: Advance) -> WalkEntry<'_> {
        let path = self.path.as_str();
        let basename = &path[path.len() - adv.basename_len..];
        WalkEntry {
            dir: adv.parent,
            basename,
            path,
            stat: adv.stat,
            depth: path.bytes().filter(|&b| b == b'/').count() + 1,
        }
    }
}

impl Drop for Frames {
    fn drop(&mut self) {
        while !self.stack.is_empty() {
            self.pop();
        }
    }
}

/// Depth-first pre-order traversal.
///
/// Directories are visited before their contents; every file and directory
/// under the starting directory is emitted exactly once. Iterator errors
/// pop the failing frame and surface; calling [`Walker::next`] again
/// resumes at the parent.
pub struct Walker {
    frames: Frames,
}

impl Walker {
    pub(crate) fn new(vfs: &Vfs, dir: Dir) -> VfsResult<Self> {
        Ok(Self {
            frames: Frames::open(vfs, dir)?,
        })
    }

    pub fn next(&mut self) -> VfsResult<Option<WalkEntry<'_>>> {
        match self.frames.advance(true)? {
            Some(adv) => Ok(Some(self.frames.emit(adv))),
            None => Ok(None),
        }
    }

    /// Abandon the rest of the current directory and resume at its parent.
    pub fn leave(&mut self) {
        self.frames.pop();
    }
}

struct Pending {
    parent: Dir,
    basename_len: usize,
}

/// A walker that does not descend on its own: after a directory entry is
/// yielded, [`SelectiveWalker::enter`] descends into it, anything else
/// skips it.
pub struct SelectiveWalker {
    frames: Frames,
    pending: Option<Pending>,
}

impl SelectiveWalker {
    pub(crate) fn new(vfs: &Vfs, dir: Dir) -> VfsResult<Self> {
        Ok(Self {
            frames: Frames::open(vfs, dir)?,
            pending: None,
        })
    }

    pub fn next(&mut self) -> VfsResult<Option<WalkEntry<'_>>> {
        self.pending = None;
        match self.frames.advance(false)? {
            Some(adv) => {
                if adv.is_dir {
                    self.pending = Some(Pending {
                        parent: adv.parent,
                        basename_len: adv.basename_len,
                    });
                }
                Ok(Some(self.frames.emit(adv)))
            }
            None => Ok(None),
        }
    }

    /// Descend into the directory most recently yielded by
    /// [`SelectiveWalker::next`]. Fails with [`VfsError::NotDir`] when the
    /// last entry was not a directory (or was already consumed).
    pub fn enter(&mut self) -> VfsResult<()> {
        let pending = self.pending.take().ok_or(VfsError::NotDir)?;
        let basename = self.frames.path[self.frames.path.len() - pending.basename_len..].to_string();
        self.frames.push_child(pending.parent, &basename)
    }

    /// Pop one frame, resuming at the parent directory.
    pub fn leave(&mut self) {
        self.pending = None;
        self.frames.pop();
    }
}

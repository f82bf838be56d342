//! Core identifier and metadata types.

use bitflags::bitflags;

/// Opaque directory handle.
///
/// The reserved value 0 ([`Dir::ROOT`]) names the virtual root of the VFS
/// it came from; every other value is backend-private. Handles only have
/// meaning together with the VFS that produced them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Dir(u32);

impl Dir {
    /// The root sentinel: "this VFS's current logical root".
    pub const ROOT: Dir = Dir(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

/// Opaque file handle. Backend-private; no reserved values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct File(u32);

impl File {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque directory-iteration cookie, owned by the backend that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct IterId(u32);

impl IterId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Dir,
    File,
}

/// Entry metadata.
///
/// Timestamps are signed nanoseconds since the Unix epoch, 0 when the
/// backend does not know. `size` is 0 for directories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stat {
    pub kind: Kind,
    pub size: u64,
    pub mtime: i128,
    pub ctime: i128,
}

bitflags! {
    /// Capability bits evaluated by the facade before any backend dispatch.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        const CREATE = 1 << 0;
        const DELETE = 1 << 1;
        const READ = 1 << 2;
        const WRITE = 1 << 3;
        const ITERATE = 1 << 4;
        const STAT = 1 << 5;
    }
}

impl Permissions {
    /// Everything except `CREATE`, `DELETE` and `WRITE`.
    pub const fn read_only() -> Self {
        Self::READ.union(Self::ITERATE).union(Self::STAT)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirOpenOptions {
    /// Open the directory for iteration.
    pub iterate: bool,
    /// Create the directory (and missing parents) if absent.
    pub create: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirDeleteOptions {
    /// Delete the directory tree instead of requiring it to be empty.
    pub recursive: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Mode {
    pub const fn readable(self) -> bool {
        matches!(self, Mode::ReadOnly | Mode::ReadWrite)
    }

    pub const fn writable(self) -> bool {
        matches!(self, Mode::WriteOnly | Mode::ReadWrite)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileOpenOptions {
    pub mode: Mode,
    /// Create the file if absent.
    pub create: bool,
}

/// Seek origin. `Forward`/`Backward` are relative to the per-handle cursor
/// with saturating arithmetic; `FromEnd` subtracts from the current end
/// position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Set,
    Forward,
    Backward,
    FromEnd,
}

/// One directory entry as produced by iteration. Basenames always pass
/// [`SafePath`](crate::SafePath) validation; backends skip entries whose
/// host names do not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub basename: String,
    pub stat: Stat,
}

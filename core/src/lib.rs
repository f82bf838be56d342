//! Harha core: a capability-controlled virtual filesystem abstraction.
//!
//! A [`Vfs`] exposes one operation vocabulary — open/close/stat/iterate/
//! read/write/seek/delete — over opaque [`Dir`] and [`File`] handles,
//! enforced by a [`Permissions`] set and a validated-path discipline
//! ([`SafePath`]). Concrete storage lives behind the [`Backend`] trait;
//! composing backends (overlay, multiplexer) are themselves backends over
//! other `Vfs` instances.

mod backend;
mod error;
mod iter;
pub mod noop;
mod path;
mod types;
mod vfs;
mod walker;

pub use backend::Backend;
pub use error::{VfsError, VfsResult};
pub use iter::DirIter;
pub use path::{SafePath, SafePathBuf};
pub use types::{
    Dir, DirDeleteOptions, DirEntry, DirOpenOptions, File, FileOpenOptions, IterId, Kind, Mode,
    Permissions, Stat, Whence,
};
pub use vfs::Vfs;
pub use walker::{SelectiveWalker, WalkEntry, Walker};

//! The host-OS adapter: positional vectored I/O, stat translation, and the
//! single place where `std::io::Error` becomes a [`VfsError`].

use std::fs;
use std::io::{self, IoSlice, IoSliceMut};
use std::path::Path;
use std::time::UNIX_EPOCH;

use tracing::warn;

use harha_core::{Kind, Stat, VfsError, VfsResult};

pub(crate) fn io_result<T>(op: &'static str, result: io::Result<T>) -> VfsResult<T> {
    result.map_err(|err| map_io_error(op, err))
}

/// Translate a host error exactly once. Categories the taxonomy cannot
/// express meaningfully collapse to `Unexpected`, with the detail logged
/// before it is erased.
pub(crate) fn map_io_error(op: &'static str, err: io::Error) -> VfsError {
    #[cfg(unix)]
    if let Some(kind) = map_unix_errno(&err) {
        return kind;
    }
    let kind = err.kind();
    let mapped = VfsError::from(err);
    if mapped == VfsError::Unexpected {
        warn!(op, ?kind, "unclassified host error");
    }
    mapped
}

#[cfg(unix)]
fn map_unix_errno(err: &io::Error) -> Option<VfsError> {
    let raw = err.raw_os_error()?;
    let kind = match raw {
        libc::ENOENT => VfsError::FileNotFound,
        libc::ENOTDIR => VfsError::NotDir,
        libc::EISDIR => VfsError::IsDir,
        libc::EEXIST => VfsError::PathAlreadyExists,
        libc::ENOTEMPTY => VfsError::DirNotEmpty,
        libc::EACCES | libc::EPERM | libc::EROFS => VfsError::PermissionDenied,
        libc::ENOSPC => VfsError::NoSpaceLeft,
        libc::EDQUOT | libc::EMFILE | libc::ENFILE => VfsError::ResourceLimitReached,
        libc::ESPIPE => VfsError::Unseekable,
        libc::ENOMEM => VfsError::OutOfMemory,
        libc::ENOSYS | libc::ENOTSUP => VfsError::Unsupported,
        libc::ENAMETOOLONG => VfsError::InvalidPath,
        _ => return None,
    };
    Some(kind)
}

/// Stat a host path, following symlinks the way `statFile` does.
pub(crate) fn stat_path(path: &Path) -> io::Result<Stat> {
    let md = fs::metadata(path)?;
    Ok(stat_from_metadata(&md))
}

pub(crate) fn stat_from_metadata(md: &fs::Metadata) -> Stat {
    let kind = if md.is_dir() { Kind::Dir } else { Kind::File };
    Stat {
        kind,
        size: if md.is_dir() { 0 } else { md.len() },
        mtime: md
            .modified()
            .ok()
            .map(system_time_nanos)
            .unwrap_or_default(),
        ctime: ctime_nanos(md),
    }
}

fn system_time_nanos(t: std::time::SystemTime) -> i128 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(err) => -(err.duration().as_nanos() as i128),
    }
}

#[cfg(unix)]
fn ctime_nanos(md: &fs::Metadata) -> i128 {
    use std::os::unix::fs::MetadataExt;
    md.ctime() as i128 * 1_000_000_000 + md.ctime_nsec() as i128
}

#[cfg(not(unix))]
fn ctime_nanos(md: &fs::Metadata) -> i128 {
    md.created()
        .ok()
        .map(system_time_nanos)
        .unwrap_or_default()
}

/// Positional scatter read of one iovec batch (at most
/// [`IOV_BATCH`](crate::IOV_BATCH) buffers per call).
#[cfg(unix)]
pub(crate) fn preadv(file: &fs::File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> io::Result<usize> {
    use std::os::unix::io::AsRawFd;
    // IoSliceMut is guaranteed ABI-compatible with iovec.
    let n = unsafe {
        libc::preadv(
            file.as_raw_fd(),
            bufs.as_mut_ptr().cast::<libc::iovec>(),
            bufs.len() as libc::c_int,
            offset as libc::off_t,
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Positional gather write of one iovec batch.
#[cfg(unix)]
pub(crate) fn pwritev(file: &fs::File, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
    use std::os::unix::io::AsRawFd;
    let n = unsafe {
        libc::pwritev(
            file.as_raw_fd(),
            bufs.as_ptr().cast::<libc::iovec>(),
            bufs.len() as libc::c_int,
            offset as libc::off_t,
        )
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

#[cfg(windows)]
pub(crate) fn preadv(file: &fs::File, bufs: &mut [IoSliceMut<'_>], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    let mut total = 0usize;
    for buf in bufs {
        let n = file.seek_read(buf, offset + total as u64)?;
        total += n;
        if n < buf.len() {
            break;
        }
    }
    Ok(total)
}

#[cfg(windows)]
pub(crate) fn pwritev(file: &fs::File, bufs: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    let mut total = 0usize;
    for buf in bufs {
        let n = file.seek_write(buf, offset + total as u64)?;
        total += n;
        if n < buf.len() {
            break;
        }
    }
    Ok(total)
}

//! Positional reads on the shared backing file.
//!
//! Every open file handle reads through one `fs::File`, so nothing here may
//! touch the host file position.

use std::fs;
use std::io::{self, IoSliceMut};

use tracing::warn;

use harha_core::{VfsError, VfsResult};

pub(crate) fn io_result<T>(op: &'static str, result: io::Result<T>) -> VfsResult<T> {
    result.map_err(|err| {
        let kind = err.kind();
        let mapped = VfsError::from(err);
        if mapped == VfsError::Unexpected {
            warn!(op, ?kind, "unclassified host error");
        }
        mapped
    })
}

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

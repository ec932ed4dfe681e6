// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-descriptor flag helpers and EINTR-safe transfer loops.

use crate::SysError;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// Put `fd` into nonblocking mode.
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<(), SysError> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(|e| SysError::new("fcntl F_GETFL", e))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(|e| SysError::new("fcntl F_SETFL", e))?;
    Ok(())
}

/// Mark `fd` close-on-exec.
pub fn set_cloexec(fd: BorrowedFd<'_>) -> Result<(), SysError> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFD).map_err(|e| SysError::new("fcntl F_GETFD", e))?;
    let flags = FdFlag::from_bits_truncate(flags) | FdFlag::FD_CLOEXEC;
    fcntl(raw, FcntlArg::F_SETFD(flags)).map_err(|e| SysError::new("fcntl F_SETFD", e))?;
    Ok(())
}

/// Clear close-on-exec so `fd` survives into a spawned child.
pub fn clear_cloexec(fd: BorrowedFd<'_>) -> Result<(), SysError> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFD).map_err(|e| SysError::new("fcntl F_GETFD", e))?;
    let flags = FdFlag::from_bits_truncate(flags) & !FdFlag::FD_CLOEXEC;
    fcntl(raw, FcntlArg::F_SETFD(flags)).map_err(|e| SysError::new("fcntl F_SETFD", e))?;
    Ok(())
}

/// Create a pipe; returns (read end, write end).
pub fn pipe_pair() -> Result<(OwnedFd, OwnedFd), SysError> {
    nix::unistd::pipe().map_err(|e| SysError::new("pipe", e))
}

/// Write the whole buffer, retrying on EINTR. Blocks until done or error.
pub fn write_all(fd: impl AsFd, mut buf: &[u8]) -> Result<(), SysError> {
    while !buf.is_empty() {
        match nix::unistd::write(fd.as_fd(), buf) {
            Ok(0) => return Err(SysError::new("write", Errno::EPIPE)),
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(SysError::new("write", e)),
        }
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes, retrying on EINTR.
///
/// Returns the number of bytes actually read: `buf.len()` on success, less
/// when the peer closed early (0 for immediate EOF).
pub fn read_exact(fd: RawFd, buf: &mut [u8]) -> Result<usize, SysError> {
    let mut filled = 0;
    while filled < buf.len() {
        match nix::unistd::read(fd, &mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(SysError::new("read", e)),
        }
    }
    Ok(filled)
}

/// Borrow a raw fd for a nix call.
///
/// # Safety
/// The caller must guarantee `fd` stays open for the borrow's lifetime.
pub unsafe fn borrow_raw<'a>(fd: RawFd) -> BorrowedFd<'a> {
    BorrowedFd::borrow_raw(fd)
}

/// Duplicate `fd` onto `target` (used to pin inherited fds to fixed
/// numbers across exec).
pub fn dup_to(fd: RawFd, target: RawFd) -> Result<(), SysError> {
    nix::unistd::dup2(fd, target).map_err(|e| SysError::new("dup2", e))?;
    Ok(())
}

#[cfg(test)]
#[path = "fd_tests.rs"]
mod tests;

//! Small descriptor helpers used while preparing a spawn.
//!
//! Everything here runs in the parent before fork.

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::sys::stat::Mode;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// First descriptor number above the standard streams.
pub(crate) const FIRST_NON_STD_FD: RawFd = 3;

/// Duplicate `fd` to the lowest free number >= 3, close-on-exec.
pub(crate) fn dup_above_std(fd: RawFd) -> nix::Result<OwnedFd> {
    let new_fd = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(FIRST_NON_STD_FD))?;
    // SAFETY: F_DUPFD_CLOEXEC returned a fresh descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
}

/// Make sure an owned descriptor does not sit on a standard slot.
///
/// A pipe created while the parent has one of 0..=2 closed lands on that
/// slot, and redirecting another stream onto it in the child would clobber
/// it before it is used.
pub(crate) fn lift_above_std(fd: OwnedFd) -> nix::Result<OwnedFd> {
    if fd.as_raw_fd() >= FIRST_NON_STD_FD {
        return Ok(fd);
    }
    dup_above_std(fd.as_raw_fd())
}

/// Open `/dev/null` for reading and writing, close-on-exec.
pub(crate) fn open_null() -> nix::Result<OwnedFd> {
    let fd = open("/dev/null", OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty())?;
    // SAFETY: open returned a fresh descriptor nobody else owns.
    lift_above_std(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Whether `fd` refers to an open descriptor.
pub(crate) fn is_open(fd: RawFd) -> bool {
    !matches!(fcntl(fd, FcntlArg::F_GETFD), Err(Errno::EBADF))
}

/// Whether `fd` has close-on-exec set.
pub(crate) fn is_cloexec(fd: RawFd) -> nix::Result<bool> {
    let flags = fcntl(fd, FcntlArg::F_GETFD)?;
    Ok(FdFlag::from_bits_truncate(flags).contains(FdFlag::FD_CLOEXEC))
}

//! The child branch: everything that runs between fork and exec.
//!
//! Only async-signal-safe calls are allowed here. All inputs were prepared
//! by the parent ([`ChildConfig`] holds raw descriptor numbers and pointers
//! into buffers that were allocated before fork). Nothing in this module
//! allocates, takes a lock, logs, panics or returns.

use crate::capabilities::Capabilities;
use crate::error_channel::{report_child_failure, CHILD_FAILURE_STATUS};
use crate::fd::FIRST_NON_STD_FD;
use crate::marshal::CStringArray;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, close, dup2, getppid, Pid};
use spawnkit_common::{SetupStage, StdStream};
use std::ffi::CStr;
use std::os::fd::RawFd;

/// Immutable snapshot of what the child must do before exec.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChildConfig<'a> {
    /// Descriptor to install on slots 0, 1 and 2.
    pub redirects: [Option<RawFd>; 3],
    /// Pipe ends the parent keeps; the child closes its copies.
    pub parent_ends: [Option<RawFd>; 3],
    pub error_read: RawFd,
    pub error_write: RawFd,
    pub close_fds: bool,
    pub caps: Capabilities,
    /// Raw number, so real-time signals work too.
    pub death_signal: Option<libc::c_int>,
    /// Process that forked us, for the death-signal liveness re-check.
    pub parent_pid: Pid,
    pub cwd: Option<&'a CStr>,
    pub umask: Option<Mode>,
    pub restore_sigpipe: bool,
    /// File name looked up on `PATH` when it has no slash.
    pub program: &'a CStr,
    pub argv: &'a CStringArray,
    /// `None` inherits the parent's environment.
    pub envp: Option<&'a CStringArray>,
}

/// Configure the forked child and replace its image. Never returns.
pub(crate) fn run_child(cfg: &ChildConfig<'_>) -> ! {
    let _ = close(cfg.error_read);
    for fd in cfg.parent_ends.into_iter().flatten() {
        let _ = close(fd);
    }

    if let Err(errno) = redirect_std(&cfg.redirects) {
        report_child_failure(cfg.error_write, SetupStage::Redirect, errno);
    }

    if cfg.close_fds {
        if let Err(errno) = close_non_std(cfg.error_write, &cfg.caps) {
            report_child_failure(cfg.error_write, SetupStage::CloseDescriptors, errno);
        }
    }

    if let Some(signal) = cfg.death_signal {
        if let Err(errno) = set_death_signal(signal) {
            report_child_failure(cfg.error_write, SetupStage::DeathSignal, errno);
        }
        // The parent may have died before the registration took effect.
        if getppid() != cfg.parent_pid {
            die_by_signal(signal);
        }
    }

    if let Some(dir) = cfg.cwd {
        if let Err(errno) = chdir(dir) {
            report_child_failure(cfg.error_write, SetupStage::Chdir, errno);
        }
    }

    if let Some(mask) = cfg.umask {
        umask(mask);
    }

    if let Err(errno) = reset_signals(cfg.restore_sigpipe) {
        report_child_failure(cfg.error_write, SetupStage::SignalReset, errno);
    }

    // SAFETY: program, argv and envp point into buffers owned by the parent
    // frame that forked us; they stay valid because this function never
    // returns. Both arrays are null-terminated.
    unsafe {
        match cfg.envp {
            Some(envp) => libc::execvpe(cfg.program.as_ptr(), cfg.argv.as_ptr(), envp.as_ptr()),
            None => libc::execvp(cfg.program.as_ptr(), cfg.argv.as_ptr()),
        };
    }

    report_child_failure(cfg.error_write, SetupStage::Exec, Errno::last())
}

/// Install the planned descriptors on the standard slots.
///
/// A descriptor already sitting on its slot only needs close-on-exec
/// cleared; `dup2` onto itself would leave the flag in place.
fn redirect_std(redirects: &[Option<RawFd>; 3]) -> Result<(), Errno> {
    for stream in StdStream::ALL {
        let Some(fd) = redirects[stream.index()] else {
            continue;
        };
        let slot = stream.fileno();
        if fd == slot {
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
        } else {
            dup2(fd, slot)?;
        }
    }
    Ok(())
}

/// Close every descriptor above 2 except the error channel's write end.
///
/// `close_range` first; if the kernel refuses it, whatever `/proc/self/fd`
/// lists; if that cannot be read either, every number below the system-wide
/// descriptor ceiling.
fn close_non_std(keep: RawFd, caps: &Capabilities) -> Result<(), Errno> {
    if caps.close_range {
        match close_range_around(keep) {
            Ok(()) => return Ok(()),
            Err(Errno::ENOSYS) | Err(Errno::EPERM) | Err(Errno::EINVAL) => {}
            Err(errno) => return Err(errno),
        }
    }

    if close_listed(keep).is_err() {
        close_all_below(keep, caps.max_fd);
    }
    Ok(())
}

const PROC_SELF_FD: &[u8] = b"/proc/self/fd\0";

/// Room for a few hundred directory entries per `getdents64` call.
const DIRENT_BUF_LEN: usize = 4096;

/// Byte offsets inside a `linux_dirent64` record.
const DIRENT_RECLEN_OFFSET: usize = 16;
const DIRENT_NAME_OFFSET: usize = 19;

/// Close the descriptors listed in `/proc/self/fd`.
///
/// Reads the directory with raw `getdents64` into a stack buffer, so
/// nothing is allocated. Descriptor entries are keyed by number, so closing
/// while reading does not skip any.
fn close_listed(keep: RawFd) -> Result<(), Errno> {
    // SAFETY: PROC_SELF_FD is NUL-terminated.
    let dir = unsafe {
        libc::open(
            PROC_SELF_FD.as_ptr().cast(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    };
    if dir < 0 {
        return Err(Errno::last());
    }

    let mut buf = [0u8; DIRENT_BUF_LEN];
    let result = loop {
        // SAFETY: the buffer is valid for writes of its full length.
        let n = unsafe { libc::syscall(libc::SYS_getdents64, dir, buf.as_mut_ptr(), buf.len()) };
        if n < 0 {
            break Err(Errno::last());
        }
        if n == 0 {
            break Ok(());
        }

        let mut entries = &buf[..n as usize];
        while let Some(reclen) = record_len(entries) {
            if let Some(fd) = entries.get(DIRENT_NAME_OFFSET..reclen).and_then(parse_fd) {
                if fd >= FIRST_NON_STD_FD && fd != keep && fd != dir {
                    // SAFETY: see `close_all_below`.
                    unsafe { libc::close(fd) };
                }
            }
            entries = &entries[reclen..];
        }
    };

    // SAFETY: `dir` was opened above and is not used afterwards.
    unsafe { libc::close(dir) };
    result
}

/// Length of the first record in `entries`, if it is well formed.
fn record_len(entries: &[u8]) -> Option<usize> {
    let bytes = entries.get(DIRENT_RECLEN_OFFSET..DIRENT_NAME_OFFSET - 1)?;
    let reclen = u16::from_ne_bytes([bytes[0], bytes[1]]) as usize;
    (reclen > DIRENT_NAME_OFFSET && reclen <= entries.len()).then_some(reclen)
}

/// Parse a NUL-terminated decimal entry name. `.` and `..` give `None`.
fn parse_fd(name: &[u8]) -> Option<RawFd> {
    let mut fd: RawFd = 0;
    let mut digits = 0;
    for &byte in name.iter().take_while(|&&b| b != 0) {
        if !byte.is_ascii_digit() {
            return None;
        }
        fd = fd.checked_mul(10)?.checked_add(RawFd::from(byte - b'0'))?;
        digits += 1;
    }
    (digits > 0).then_some(fd)
}

fn close_all_below(keep: RawFd, max_fd: RawFd) {
    for fd in FIRST_NON_STD_FD..max_fd {
        if fd != keep {
            // SAFETY: closing a number we may not own is the point here;
            // EBADF for unused numbers is expected and ignored.
            unsafe { libc::close(fd) };
        }
    }
}

fn close_range_around(keep: RawFd) -> Result<(), Errno> {
    let first = FIRST_NON_STD_FD as libc::c_uint;
    let keep = keep as libc::c_uint;

    if keep > first {
        sys_close_range(first, keep - 1)?;
    }
    sys_close_range(keep + 1, libc::c_uint::MAX)
}

fn sys_close_range(first: libc::c_uint, last: libc::c_uint) -> Result<(), Errno> {
    // SAFETY: plain system call on integer arguments.
    let ret = unsafe { libc::syscall(libc::SYS_close_range, first, last, 0 as libc::c_uint) };
    if ret == 0 {
        Ok(())
    } else {
        Err(Errno::last())
    }
}

fn set_death_signal(signal: libc::c_int) -> Result<(), Errno> {
    // SAFETY: PR_SET_PDEATHSIG takes the signal number as its only argument.
    let ret = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, signal as libc::c_ulong) };
    Errno::result(ret).map(drop)
}

/// Terminate with `signal` because the parent is already gone.
fn die_by_signal(signal: libc::c_int) -> ! {
    // A mask inherited from the spawning thread would keep the signal pending.
    let _ = SigSet::empty().thread_set_mask();
    // SAFETY: raise and _exit are async-signal-safe; _exit never returns.
    unsafe {
        libc::raise(signal);
        libc::_exit(CHILD_FAILURE_STATUS)
    }
}

/// Clear the inherited signal mask and, on request, put SIGPIPE back to its
/// default disposition.
fn reset_signals(restore_sigpipe: bool) -> Result<(), Errno> {
    SigSet::empty().thread_set_mask()?;

    if restore_sigpipe {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: installing SIG_DFL does not register any handler code.
        unsafe { sigaction(Signal::SIGPIPE, &default) }?;
    }
    Ok(())
}

//! Error channel between a forked child and its parent.
//!
//! One close-on-exec pipe per spawn. The child writes at most one fixed-size
//! frame (errno plus the failing [`SetupStage`]) and exits; a successful exec
//! closes the write end instead. The parent reads until end-of-file, so an
//! empty read means the new image is running and a full frame means it never
//! will.

use crate::fd::lift_above_std;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use spawnkit_common::{SetupStage, SpawnError, SpawnResult};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Size of the single message a child may send.
pub const FRAME_LEN: usize = 8;

/// Exit status of a child that failed before exec.
pub const CHILD_FAILURE_STATUS: i32 = 127;

/// Encode a failure report. Does not allocate.
pub fn encode_frame(stage: SetupStage, errno: Errno) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&(errno as i32).to_ne_bytes());
    frame[4..].copy_from_slice(&stage.code().to_ne_bytes());
    frame
}

/// Decode a failure report received from a child.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> SpawnResult<(SetupStage, Errno)> {
    let mut errno_bytes = [0u8; 4];
    let mut stage_bytes = [0u8; 4];
    errno_bytes.copy_from_slice(&frame[..4]);
    stage_bytes.copy_from_slice(&frame[4..]);

    let code = u32::from_ne_bytes(stage_bytes);
    let stage = SetupStage::from_code(code)
        .ok_or_else(|| SpawnError::propagation(format!("unknown setup stage {}", code)))?;
    let errno = Errno::from_raw(i32::from_ne_bytes(errno_bytes));
    Ok((stage, errno))
}

/// Both ends of a fresh error channel.
#[derive(Debug)]
pub struct ErrorChannel {
    read: OwnedFd,
    write: OwnedFd,
}

impl ErrorChannel {
    /// Create the pipe, close-on-exec on both ends.
    pub fn new() -> SpawnResult<Self> {
        let (read, write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|errno| SpawnError::resource("error channel", errno))?;
        let read = lift_above_std(read).map_err(|errno| SpawnError::resource("error channel", errno))?;
        let write = lift_above_std(write).map_err(|errno| SpawnError::resource("error channel", errno))?;
        Ok(Self { read, write })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    pub fn write_fd(&self) -> RawFd {
        self.write.as_raw_fd()
    }

    /// Close the parent's copy of the write end and keep the read end.
    ///
    /// Must happen right after fork: as long as the parent holds a write
    /// end, the read never sees end-of-file.
    pub fn into_reader(self) -> ErrorReader {
        let Self { read, write } = self;
        drop(write);
        ErrorReader {
            file: File::from(read),
        }
    }
}

/// Parent side of the channel.
#[derive(Debug)]
pub struct ErrorReader {
    file: File,
}

impl ErrorReader {
    /// Block until the child either replaced its image (`Ok(None)`) or
    /// reported a failure (`Ok(Some(..))`).
    ///
    /// Any other outcome (read error, truncated or garbled frame) is a
    /// [`SpawnError::Propagation`].
    pub fn wait_for_exec(mut self) -> SpawnResult<Option<(SetupStage, Errno)>> {
        let mut frame = [0u8; FRAME_LEN];
        let mut filled = 0;

        while filled < FRAME_LEN {
            match self.file.read(&mut frame[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(SpawnError::propagation(format!(
                        "reading the error channel failed: {}",
                        e
                    )))
                }
            }
        }

        match filled {
            0 => Ok(None),
            FRAME_LEN => decode_frame(&frame).map(Some),
            n => Err(SpawnError::propagation(format!(
                "truncated error report: {} of {} bytes",
                n, FRAME_LEN
            ))),
        }
    }
}

/// Write `bytes` to `fd` with raw `write(2)`, retrying on EINTR.
///
/// Async-signal-safe: usable between fork and exec.
pub(crate) fn write_all_raw(fd: RawFd, bytes: &[u8]) -> Result<(), Errno> {
    let mut written = 0;
    while written < bytes.len() {
        let rest = &bytes[written..];
        // SAFETY: `rest` is a valid, initialized buffer of `rest.len()` bytes.
        let n = unsafe { libc::write(fd, rest.as_ptr().cast(), rest.len()) };
        if n < 0 {
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(errno),
            }
        }
        if n == 0 {
            return Err(Errno::EIO);
        }
        written += n as usize;
    }
    Ok(())
}

/// Report a setup failure and terminate the child.
///
/// Runs between fork and exec: no allocation, no locks, no unwinding.
pub(crate) fn report_child_failure(write_fd: RawFd, stage: SetupStage, errno: Errno) -> ! {
    let frame = encode_frame(stage, errno);
    // Nothing left to do if even this fails; the parent sees a bare EOF
    // followed by our exit status.
    let _ = write_all_raw(write_fd, &frame);
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(CHILD_FAILURE_STATUS) }
}

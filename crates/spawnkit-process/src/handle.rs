//! Owned handle to a spawned child.

use crate::signal::send_signal;
use crate::status::ExitStatus;
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use spawnkit_common::{ProcessError, ProcessResult, SpawnResult};
use spawnkit_core::{SpawnRequest, SpawnedProcess};
use std::fs::File;
use tracing::{debug, info};

/// A running (or finished, not yet dropped) child process.
///
/// The stream fields hold the parent ends of piped streams; take them to
/// hand them elsewhere. Dropping the handle closes whatever ends it still
/// holds, but neither kills nor reaps the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    spawned_at: DateTime<Utc>,
    status: Option<ExitStatus>,
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

impl ProcessHandle {
    pub fn spawn(request: &SpawnRequest<'_>) -> SpawnResult<Self> {
        spawnkit_core::spawn(request).map(Self::from)
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// When the child finished exec, in UTC.
    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    /// Status recorded by an earlier successful wait.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Block until the child exits, then reap it.
    ///
    /// Closes the stdin pipe first so a child reading it sees end-of-file.
    /// Later calls return the recorded status.
    pub fn wait(&mut self) -> ProcessResult<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        drop(self.stdin.take());
        let status = wait_pid(self.pid)?;
        Ok(self.record(status))
    }

    /// Reap the child if it has exited, without blocking.
    pub fn try_wait(&mut self) -> ProcessResult<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        loop {
            match raw_waitpid(self.pid, libc::WNOHANG) {
                Ok(status) => return Ok(status.map(|s| self.record(s))),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(ProcessError::wait_failed(self.pid(), errno)),
            }
        }
    }

    /// Send `signal` to the child. A child that was already reaped is left
    /// alone, since its PID may belong to someone else by now.
    pub fn send_signal(&self, signal: Signal) -> ProcessResult<()> {
        if self.status.is_some() {
            debug!(pid = self.pid(), signal = signal.as_str(), "Child already reaped, not signaling");
            return Ok(());
        }
        send_signal(self.pid(), signal)
    }

    pub fn terminate(&self) -> ProcessResult<()> {
        self.send_signal(Signal::SIGTERM)
    }

    pub fn kill(&self) -> ProcessResult<()> {
        self.send_signal(Signal::SIGKILL)
    }

    /// Whether the child is still running. Reaps it if it is not.
    pub fn is_alive(&mut self) -> ProcessResult<bool> {
        Ok(self.try_wait()?.is_none())
    }

    pub(crate) fn record(&mut self, status: ExitStatus) -> ExitStatus {
        info!(pid = self.pid(), %status, "Child exited");
        self.status = Some(status);
        status
    }
}

impl From<SpawnedProcess> for ProcessHandle {
    fn from(child: SpawnedProcess) -> Self {
        Self {
            pid: child.pid,
            spawned_at: Utc::now(),
            status: None,
            stdin: child.stdin.map(File::from),
            stdout: child.stdout.map(File::from),
            stderr: child.stderr.map(File::from),
        }
    }
}

/// Blocking wait for `pid` until it terminates, retrying on EINTR.
pub(crate) fn wait_pid(pid: Pid) -> ProcessResult<ExitStatus> {
    loop {
        match raw_waitpid(pid, 0) {
            Ok(Some(status)) => return Ok(status),
            Ok(None) | Err(Errno::EINTR) => continue,
            Err(errno) => return Err(ProcessError::wait_failed(pid.as_raw() as u32, errno)),
        }
    }
}

/// `waitpid(2)` returning the decoded terminal status, if any.
///
/// `nix::sys::wait::waitpid` rejects statuses carrying a real-time signal
/// after the child is already reaped, so the raw call is used instead.
fn raw_waitpid(pid: Pid, flags: libc::c_int) -> Result<Option<ExitStatus>, Errno> {
    let mut status: libc::c_int = 0;
    // SAFETY: `status` is a valid out pointer for the duration of the call.
    let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, flags) };
    match ret {
        -1 => Err(Errno::last()),
        0 => Ok(None),
        _ => Ok(ExitStatus::from_raw(status)),
    }
}

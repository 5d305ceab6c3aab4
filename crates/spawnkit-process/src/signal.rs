//! Signal delivery and liveness checks by PID.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use spawnkit_common::{ProcessError, ProcessResult};
use tracing::debug;

/// Send `signal` to `pid`.
pub fn send_signal(pid: u32, signal: Signal) -> ProcessResult<()> {
    debug!(pid, signal = signal.as_str(), "Sending signal");
    kill(Pid::from_raw(pid as i32), signal)
        .map_err(|errno| ProcessError::signal_failed(pid, signal.as_str(), errno))
}

/// Ask a process to exit (SIGTERM).
pub fn terminate_gracefully(pid: u32) -> ProcessResult<()> {
    send_signal(pid, Signal::SIGTERM)
}

/// Kill a process outright (SIGKILL).
pub fn force_kill(pid: u32) -> ProcessResult<()> {
    send_signal(pid, Signal::SIGKILL)
}

/// Check whether a process with the given PID exists.
///
/// Uses `kill(pid, 0)`: no signal is sent. A zombie still counts as
/// existing until it is reaped.
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        // Exists, but belongs to someone else.
        Err(Errno::EPERM) => Ok(true),
        Err(errno) => Err(ProcessError::signal_failed(pid, "signal 0", errno)),
    }
}

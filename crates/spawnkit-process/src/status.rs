//! How a child ended.

use nix::sys::signal::Signal;
use serde::Serialize;
use std::fmt;

/// Offset shells add to a signal number to form an exit code.
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// Termination status of a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Called `exit` (or returned from `main`) with this code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled { signal: i32, core_dumped: bool },
}

impl ExitStatus {
    /// Decode a raw `waitpid` status. Stop and continue notifications
    /// return `None`.
    ///
    /// Works on the raw value because real-time signals have no
    /// [`Signal`] variant.
    pub fn from_raw(status: libc::c_int) -> Option<Self> {
        if libc::WIFEXITED(status) {
            Some(Self::Exited(libc::WEXITSTATUS(status)))
        } else if libc::WIFSIGNALED(status) {
            Some(Self::Signaled {
                signal: libc::WTERMSIG(status),
                core_dumped: libc::WCOREDUMP(status),
            })
        } else {
            None
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            Self::Signaled { .. } => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            Self::Exited(_) => None,
            Self::Signaled { signal, .. } => Some(*signal),
        }
    }

    /// Exit code the way a shell reports it: 128 + N for signal N.
    pub fn shell_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled { signal, .. } => SIGNAL_EXIT_BASE + signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {}", code),
            Self::Signaled {
                signal,
                core_dumped,
            } => {
                match Signal::try_from(*signal) {
                    Ok(sig) => write!(f, "signal {} ({})", signal, sig.as_str())?,
                    Err(_) => write!(f, "signal {}", signal)?,
                }
                if *core_dumped {
                    write!(f, " (core dumped)")?;
                }
                Ok(())
            }
        }
    }
}

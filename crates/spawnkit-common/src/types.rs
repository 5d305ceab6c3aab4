//! Core domain types shared by the spawnkit crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::RawFd;

/// One of the three conventionally numbered standard streams.
///
/// # Example
/// ```
/// use spawnkit_common::StdStream;
///
/// assert_eq!(StdStream::Stderr.fileno(), 2);
/// assert_eq!(StdStream::ALL.len(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    /// All standard streams in descriptor order.
    pub const ALL: [StdStream; 3] = [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr];

    /// The fixed descriptor slot this stream occupies in a child.
    pub const fn fileno(self) -> RawFd {
        match self {
            StdStream::Stdin => 0,
            StdStream::Stdout => 1,
            StdStream::Stderr => 2,
        }
    }

    /// Index into per-stream arrays.
    pub const fn index(self) -> usize {
        self.fileno() as usize
    }

    /// Whether the child reads from this stream (only stdin).
    pub const fn is_input(self) -> bool {
        matches!(self, StdStream::Stdin)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            StdStream::Stdin => "stdin",
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The step of child setup that failed before the program image was replaced.
///
/// The numeric codes travel over the error channel next to the errno, so
/// they must stay stable for the lifetime of a single binary (both sides of
/// a fork always run the same build).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStage {
    /// Moving a planned descriptor onto a standard slot.
    Redirect,
    /// Closing descriptors above 2.
    CloseDescriptors,
    /// Registering the parent-death signal.
    DeathSignal,
    /// Changing the working directory.
    Chdir,
    /// Resetting the signal mask or SIGPIPE disposition.
    SignalReset,
    /// Replacing the program image.
    Exec,
}

impl SetupStage {
    pub const fn code(self) -> u32 {
        match self {
            SetupStage::Redirect => 1,
            SetupStage::CloseDescriptors => 2,
            SetupStage::DeathSignal => 3,
            SetupStage::Chdir => 4,
            SetupStage::SignalReset => 5,
            SetupStage::Exec => 6,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(SetupStage::Redirect),
            2 => Some(SetupStage::CloseDescriptors),
            3 => Some(SetupStage::DeathSignal),
            4 => Some(SetupStage::Chdir),
            5 => Some(SetupStage::SignalReset),
            6 => Some(SetupStage::Exec),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            SetupStage::Redirect => "descriptor redirection",
            SetupStage::CloseDescriptors => "descriptor cleanup",
            SetupStage::DeathSignal => "death signal registration",
            SetupStage::Chdir => "working directory change",
            SetupStage::SignalReset => "signal reset",
            SetupStage::Exec => "exec",
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

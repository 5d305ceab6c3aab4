//! Error types for spawnkit.
//!
//! Spawning fails in exactly one of four ways, and the variant tells the
//! caller whether a child ever existed:
//!
//! | Variant | Child created? |
//! |---|---|
//! | [`SpawnError::Validation`] | never |
//! | [`SpawnError::Resource`] | never |
//! | [`SpawnError::ChildSetup`] | yes, already reaped |
//! | [`SpawnError::Propagation`] | yes, killed and reaped |
//!
//! Operations on a running child (wait, signal, stream I/O) report
//! [`ProcessError`] instead.
//!
//! ```
//! use spawnkit_common::{SpawnError, SetupStage};
//! use nix::errno::Errno;
//!
//! let err = SpawnError::child_setup(SetupStage::Exec, Errno::ENOENT);
//! let io: std::io::Error = err.into();
//! assert_eq!(io.raw_os_error(), Some(Errno::ENOENT as i32));
//! ```

use crate::types::SetupStage;
use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Result type for spawn operations.
pub type SpawnResult<T> = std::result::Result<T, SpawnError>;

/// Why a spawn did not produce a process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// Malformed arguments, environment or options. Detected before fork.
    #[error("Invalid spawn request: {reason}")]
    Validation { reason: String },

    /// The platform refused to allocate a descriptor or a process.
    #[error("Resource allocation failed ({operation}): {errno}")]
    Resource {
        operation: &'static str,
        errno: Errno,
    },

    /// The child failed between fork and exec and reported it over the
    /// error channel.
    #[error("Child setup failed during {stage}: {errno}")]
    ChildSetup { stage: SetupStage, errno: Errno },

    /// The error channel itself misbehaved.
    #[error("Error channel failure: {reason}")]
    Propagation { reason: String },
}

impl SpawnError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn resource(operation: &'static str, errno: Errno) -> Self {
        Self::Resource { operation, errno }
    }

    pub fn child_setup(stage: SetupStage, errno: Errno) -> Self {
        Self::ChildSetup { stage, errno }
    }

    pub fn propagation(reason: impl Into<String>) -> Self {
        Self::Propagation {
            reason: reason.into(),
        }
    }

    /// The OS error code behind this failure, when there is one.
    ///
    /// For [`SpawnError::ChildSetup`] this is exactly the errno the failing
    /// call produced inside the child.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Resource { errno, .. } | Self::ChildSetup { errno, .. } => Some(*errno as i32),
            Self::Validation { .. } | Self::Propagation { .. } => None,
        }
    }

    /// The child setup stage that failed, for [`SpawnError::ChildSetup`].
    pub fn stage(&self) -> Option<SetupStage> {
        match self {
            Self::ChildSetup { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether a child process was created (and already cleaned up) before
    /// this error was raised.
    pub fn child_was_created(&self) -> bool {
        matches!(self, Self::ChildSetup { .. } | Self::Propagation { .. })
    }
}

impl From<SpawnError> for io::Error {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::Resource { errno, .. } | SpawnError::ChildSetup { errno, .. } => {
                io::Error::from_raw_os_error(errno as i32)
            }
            SpawnError::Validation { reason } => io::Error::new(io::ErrorKind::InvalidInput, reason),
            SpawnError::Propagation { reason } => io::Error::new(io::ErrorKind::Other, reason),
        }
    }
}

// ==============================================================================
// Running-process errors
// ==============================================================================

/// Errors from operations on an already spawned process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Failed to wait for process {pid}: {errno}")]
    WaitFailed { pid: u32, errno: Errno },

    #[error("Failed to send {signal} to process {pid}: {errno}")]
    SignalFailed {
        pid: u32,
        signal: String,
        errno: Errno,
    },

    #[error("Stream I/O failed for process {pid}: {reason}")]
    StreamIo { pid: u32, reason: String },
}

impl ProcessError {
    pub fn wait_failed(pid: u32, errno: Errno) -> Self {
        Self::WaitFailed { pid, errno }
    }

    pub fn signal_failed(pid: u32, signal: impl Into<String>, errno: Errno) -> Self {
        Self::SignalFailed {
            pid,
            signal: signal.into(),
            errno,
        }
    }

    pub fn stream_io(pid: u32, reason: impl Into<String>) -> Self {
        Self::StreamIo {
            pid,
            reason: reason.into(),
        }
    }
}

/// Result type for operations on a running process.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

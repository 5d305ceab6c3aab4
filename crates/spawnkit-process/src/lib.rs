//! # spawnkit process
//!
//! A process handle on top of [`spawnkit_core`]: wait and reap, signal,
//! check liveness, feed and drain the standard streams. With the `tokio`
//! feature (on by default) the streams convert to tokio pipes and waiting
//! can be awaited.
//!
//! ```no_run
//! use spawnkit_process::{ProcessHandle, SpawnRequest};
//!
//! let mut child = ProcessHandle::spawn(&SpawnRequest::new(["tr", "a-z", "A-Z"]))?;
//! let output = child.communicate(Some(b"shout"))?;
//! assert_eq!(output.stdout, b"SHOUT");
//! # Ok::<(), spawnkit_process::ProcessError>(())
//! ```

#[cfg(feature = "tokio")]
pub mod async_io;
pub mod communicate;
pub mod handle;
pub mod signal;
pub mod status;

#[cfg(feature = "tokio")]
pub use async_io::AsyncStreams;
pub use communicate::Output;
pub use handle::ProcessHandle;
pub use signal::{force_kill, process_exists, send_signal, terminate_gracefully};
pub use status::ExitStatus;

pub use spawnkit_common::{ProcessError, ProcessResult, SetupStage, SpawnError, SpawnResult, StdStream};
pub use spawnkit_core::{validate_death_signal, SpawnRequest, StreamSpec, MAX_UMASK};

//! # spawnkit core
//!
//! Low-level process spawning for Linux: fork, a short async-signal-safe
//! setup sequence in the child, exec. The parent learns the outcome
//! synchronously through a close-on-exec error channel.
//!
//! ## Modules
//!
//! - [`spawn`]: the request builder and the spawn operation
//! - [`plan`]: which descriptor each standard stream of the child gets
//! - [`marshal`]: argument, environment and path conversion
//! - [`error_channel`]: the child-to-parent failure report
//! - [`capabilities`]: kernel features probed once per process
//!
//! ```no_run
//! use spawnkit_core::{SpawnRequest, StreamSpec};
//!
//! let child = SpawnRequest::new(["ls", "-l"])
//!     .cwd("/tmp")
//!     .stdin(StreamSpec::Null)
//!     .close_fds(true)
//!     .spawn()?;
//! println!("started {}", child.pid);
//! # Ok::<(), spawnkit_core::SpawnError>(())
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("spawnkit-core relies on Linux-only interfaces (prctl, close_range, /proc)");

pub mod capabilities;
mod child;
pub mod error_channel;
mod fd;
pub mod marshal;
pub mod plan;
pub mod spawn;

pub use capabilities::{capabilities, Capabilities};
pub use marshal::Environment;
pub use plan::{DescriptorPlan, Side, StreamSpec};
pub use spawn::{spawn, validate_death_signal, SpawnRequest, SpawnedProcess, MAX_UMASK};
pub use spawnkit_common::{SetupStage, SpawnError, SpawnResult, StdStream};

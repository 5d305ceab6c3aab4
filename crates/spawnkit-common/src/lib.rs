//! # spawnkit common
//!
//! Error types and domain types shared by the spawnkit crates.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{ProcessError, ProcessResult, SpawnError, SpawnResult};
pub use types::{SetupStage, StdStream};

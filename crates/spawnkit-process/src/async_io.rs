//! Tokio adapters for a spawned child.
//!
//! Spawning itself stays synchronous. These helpers only move the finished
//! result into async land: pipe ends become non-blocking tokio pipes and
//! waiting runs on the blocking pool.

use crate::handle::{wait_pid, ProcessHandle};
use crate::status::ExitStatus;
use spawnkit_common::{ProcessError, ProcessResult};
use tokio::net::unix::pipe::{Receiver, Sender};

/// Async versions of a child's piped streams.
#[derive(Debug, Default)]
pub struct AsyncStreams {
    pub stdin: Option<Sender>,
    pub stdout: Option<Receiver>,
    pub stderr: Option<Receiver>,
}

impl ProcessHandle {
    /// Take the piped streams out of the handle as tokio pipes.
    ///
    /// Must be called from within a tokio runtime with I/O enabled.
    pub fn take_async_streams(&mut self) -> ProcessResult<AsyncStreams> {
        let pid = self.pid();
        let convert_err = |e: std::io::Error| ProcessError::stream_io(pid, e.to_string());

        Ok(AsyncStreams {
            stdin: self.stdin.take().map(Sender::from_file).transpose().map_err(convert_err)?,
            stdout: self.stdout.take().map(Receiver::from_file).transpose().map_err(convert_err)?,
            stderr: self.stderr.take().map(Receiver::from_file).transpose().map_err(convert_err)?,
        })
    }

    /// Wait for the child without blocking the runtime.
    pub async fn wait_async(&mut self) -> ProcessResult<ExitStatus> {
        if let Some(status) = self.status() {
            return Ok(status);
        }
        drop(self.stdin.take());

        let pid = self.pid();
        let raw = nix::unistd::Pid::from_raw(pid as i32);
        let status = tokio::task::spawn_blocking(move || wait_pid(raw))
            .await
            .map_err(|e| ProcessError::stream_io(pid, format!("wait task failed: {}", e)))??;
        Ok(self.record(status))
    }
}

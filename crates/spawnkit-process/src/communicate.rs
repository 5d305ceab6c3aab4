//! Feed a child's stdin and collect its output in one call.

use crate::handle::ProcessHandle;
use crate::status::ExitStatus;
use spawnkit_common::{ProcessError, ProcessResult};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::thread::{self, ScopedJoinHandle};
use tracing::debug;

/// Everything a finished child produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessHandle {
    /// Write `input` to stdin, close it, read stdout and stderr to the end,
    /// and wait for the child.
    ///
    /// The three streams are serviced concurrently, so a child that fills
    /// one pipe while the parent is busy with another cannot deadlock.
    /// Streams that were not piped come back empty. A child that exits
    /// without reading all of `input` is not an error.
    pub fn communicate(&mut self, input: Option<&[u8]>) -> ProcessResult<Output> {
        let pid = self.pid();
        if input.is_some() && self.stdin.is_none() {
            return Err(ProcessError::stream_io(pid, "stdin is not a pipe"));
        }

        let stdin = self.stdin.take();
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();
        debug!(
            pid,
            input_len = input.map_or(0, <[u8]>::len),
            "Communicating with child"
        );

        let (stdout, stderr) = thread::scope(|scope| -> ProcessResult<_> {
            let writer = stdin.map(|stdin| scope.spawn(move || feed(stdin, input.unwrap_or_default())));
            let err_reader = stderr.map(|stderr| scope.spawn(move || drain(stderr)));

            let out = match stdout {
                Some(stdout) => drain(stdout).map_err(|e| ProcessError::stream_io(pid, e.to_string()))?,
                None => Vec::new(),
            };
            let err = match err_reader {
                Some(handle) => join(pid, handle)?,
                None => Vec::new(),
            };
            if let Some(handle) = writer {
                join(pid, handle)?;
            }
            Ok((out, err))
        })?;

        let status = self.wait()?;
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    }
}

fn feed(mut stdin: File, input: &[u8]) -> io::Result<()> {
    match stdin.write_all(input) {
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn drain(mut stream: File) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(buf)
}

fn join<T>(pid: u32, handle: ScopedJoinHandle<'_, io::Result<T>>) -> ProcessResult<T> {
    handle
        .join()
        .map_err(|_| ProcessError::stream_io(pid, "stream thread panicked"))?
        .map_err(|e| ProcessError::stream_io(pid, e.to_string()))
}

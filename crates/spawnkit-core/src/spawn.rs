//! The spawn operation.
//!
//! Everything the child needs is validated, marshaled and allocated in the
//! parent first. Then one `fork`, one run of the restricted child branch,
//! and a blocking read on the error channel decide the outcome: either the
//! new image runs, or the parent knows exactly which setup step failed and
//! with what errno.

use crate::capabilities::capabilities;
use crate::child::{run_child, ChildConfig};
use crate::error_channel::ErrorChannel;
use crate::marshal::{marshal_args, marshal_env, marshal_path, to_cstring, Environment};
use crate::plan::{DescriptorPlan, StreamSpec};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{fork, getpid, ForkResult, Pid};
use spawnkit_common::{SpawnError, SpawnResult, StdStream};
use std::ffi::{CStr, OsStr, OsString};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Largest permission mask accepted by [`SpawnRequest::umask`].
pub const MAX_UMASK: u32 = 0o777;

/// Everything needed to start one child.
///
/// Defaults: pipes on all three streams, inherited environment and working
/// directory, no descriptor closing, no death signal, inherited umask and
/// SIGPIPE disposition.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    args: Vec<OsString>,
    program: Option<OsString>,
    cwd: Option<PathBuf>,
    env: Option<Environment>,
    stdio: [StreamSpec<'a>; 3],
    close_fds: bool,
    death_signal: i32,
    umask: Option<u32>,
    restore_sigpipe: bool,
}

impl<'a> SpawnRequest<'a> {
    /// `args[0]` is both the program to run (looked up on `PATH` when it has
    /// no slash) and the name the new image sees.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            program: None,
            cwd: None,
            env: None,
            stdio: [StreamSpec::Pipe; 3],
            close_fds: false,
            death_signal: 0,
            umask: None,
            restore_sigpipe: false,
        }
    }

    /// Run `program` instead of `args[0]`, which still becomes `argv[0]`.
    pub fn program(mut self, program: impl Into<OsString>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set one variable in an explicit environment. The first call starts
    /// from an empty environment, not from the parent's.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(Environment::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replace the child environment with exactly `vars`.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Go back to inheriting the parent's environment.
    pub fn inherit_env(mut self) -> Self {
        self.env = None;
        self
    }

    pub fn stdin(self, spec: StreamSpec<'a>) -> Self {
        self.stream(StdStream::Stdin, spec)
    }

    pub fn stdout(self, spec: StreamSpec<'a>) -> Self {
        self.stream(StdStream::Stdout, spec)
    }

    pub fn stderr(self, spec: StreamSpec<'a>) -> Self {
        self.stream(StdStream::Stderr, spec)
    }

    pub fn stream(mut self, stream: StdStream, spec: StreamSpec<'a>) -> Self {
        self.stdio[stream.index()] = spec;
        self
    }

    /// Close every descriptor above 2 in the child before exec.
    pub fn close_fds(mut self, close: bool) -> Self {
        self.close_fds = close;
        self
    }

    /// Signal delivered to the child when the spawning thread exits.
    /// `0` disables it; real-time signals are accepted.
    pub fn death_signal(mut self, signal: i32) -> Self {
        self.death_signal = signal;
        self
    }

    /// File-creation mask for the child, at most `0o777`.
    pub fn umask(mut self, mask: u32) -> Self {
        self.umask = Some(mask);
        self
    }

    /// Reset SIGPIPE to its default disposition in the child.
    pub fn restore_sigpipe(mut self, restore: bool) -> Self {
        self.restore_sigpipe = restore;
        self
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_program(&self) -> Option<&OsStr> {
        self.program.as_deref().or_else(|| self.args.first().map(OsString::as_os_str))
    }

    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn get_env(&self) -> Option<&Environment> {
        self.env.as_ref()
    }

    pub fn get_stream(&self, stream: StdStream) -> StreamSpec<'a> {
        self.stdio[stream.index()]
    }

    pub fn spawn(&self) -> SpawnResult<SpawnedProcess> {
        spawn(self)
    }
}

/// A child whose image was replaced successfully.
///
/// Holds the parent-side pipe ends for the streams that were piped. Each is
/// close-on-exec, so it does not leak into later children.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: Pid,
    pub stdin: Option<OwnedFd>,
    pub stdout: Option<OwnedFd>,
    pub stderr: Option<OwnedFd>,
}

/// Start a child as described by `request`.
///
/// Returns only after the child has either executed the new program or
/// reported why it could not. On failure the child is reaped and every
/// descriptor this call created is closed; caller descriptors are never
/// touched.
pub fn spawn(request: &SpawnRequest<'_>) -> SpawnResult<SpawnedProcess> {
    let (death_signal, umask) = validate_options(request)?;

    let argv = marshal_args(&request.args)?;
    let program_override = request
        .program
        .as_deref()
        .map(|program| to_cstring("program", program))
        .transpose()?;
    let program: &CStr = match &program_override {
        Some(program) => program.as_c_str(),
        None => argv
            .first()
            .ok_or_else(|| SpawnError::validation("argument vector must not be empty"))?,
    };
    let cwd = request
        .cwd
        .as_deref()
        .map(|dir| marshal_path("working directory", dir))
        .transpose()?;
    let envp = marshal_env(request.env.as_ref(), request.cwd.as_deref())?;

    let mut plan = DescriptorPlan::new(request.stdio)?;
    let channel = ErrorChannel::new()?;

    let config = ChildConfig {
        redirects: plan.child_fds(),
        parent_ends: plan.parent_fds(),
        error_read: channel.read_fd(),
        error_write: channel.write_fd(),
        close_fds: request.close_fds,
        caps: *capabilities(),
        death_signal,
        parent_pid: getpid(),
        cwd: cwd.as_deref(),
        umask,
        restore_sigpipe: request.restore_sigpipe,
        program,
        argv: &argv,
        envp: envp.as_ref(),
    };

    debug!(
        program = ?program,
        args = argv.len(),
        cwd = ?request.cwd,
        explicit_env = envp.is_some(),
        caller_fds = ?plan.caller_fds(),
        close_fds = request.close_fds,
        "Forking child"
    );

    // SAFETY: the child branch only makes async-signal-safe calls on data
    // prepared above and never returns into this frame.
    match unsafe { fork() } {
        Err(errno) => Err(SpawnError::resource("fork", errno)),
        Ok(ForkResult::Child) => run_child(&config),
        Ok(ForkResult::Parent { child }) => {
            let reader = channel.into_reader();
            plan.release_child_ends();

            match reader.wait_for_exec() {
                Ok(None) => {
                    let [stdin, stdout, stderr] = plan.into_parent_ends();
                    info!(pid = child.as_raw(), program = ?program, "Spawned child process");
                    Ok(SpawnedProcess {
                        pid: child,
                        stdin,
                        stdout,
                        stderr,
                    })
                }
                Ok(Some((stage, errno))) => {
                    warn!(
                        pid = child.as_raw(),
                        program = ?program,
                        %stage,
                        %errno,
                        "Child failed before exec"
                    );
                    reap(child);
                    Err(SpawnError::child_setup(stage, errno))
                }
                Err(err) => {
                    error!(pid = child.as_raw(), error = %err, "Lost track of child setup");
                    // The child's state is unknown; do not leave it running.
                    let _ = kill(child, Signal::SIGKILL);
                    reap(child);
                    Err(err)
                }
            }
        }
    }
}

fn validate_options(request: &SpawnRequest<'_>) -> SpawnResult<(Option<libc::c_int>, Option<Mode>)> {
    let death_signal = validate_death_signal(request.death_signal)?;

    let umask = match request.umask {
        None => None,
        Some(mask) if mask > MAX_UMASK => {
            return Err(SpawnError::validation(format!(
                "umask {:#o} is out of range 0..={:#o}",
                mask, MAX_UMASK
            )))
        }
        Some(mask) => Some(Mode::from_bits_truncate(mask as libc::mode_t)),
    };

    Ok((death_signal, umask))
}

/// Check a death signal number: `0` disables it, anything from 1 up to the
/// last real-time signal is accepted.
pub fn validate_death_signal(signal: i32) -> SpawnResult<Option<libc::c_int>> {
    match signal {
        0 => Ok(None),
        n if (1..=libc::SIGRTMAX()).contains(&n) => Ok(Some(n)),
        n => Err(SpawnError::validation(format!(
            "death signal {} is out of range 1..={}",
            n,
            libc::SIGRTMAX()
        ))),
    }
}

/// Collect a child that is known to be exiting.
fn reap(pid: Pid) {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: `status` is a valid out pointer for the duration of the call.
        let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) };
        if ret != -1 {
            debug!(pid = pid.as_raw(), status, "Reaped failed child");
            return;
        }
        match Errno::last() {
            Errno::EINTR => continue,
            errno => {
                warn!(pid = pid.as_raw(), %errno, "Failed to reap child");
                return;
            }
        }
    }
}

mod config;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use serde::Serialize;
use spawnkit_process::{send_signal, ExitStatus, Output, ProcessError, ProcessHandle, ProcessResult, SpawnError};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use config::{parse_env_pair, parse_umask, RequestFile, StreamChoice};

/// Exit code when the program could not be found.
const EXIT_NOT_FOUND: i32 = 127;
/// Exit code when the program was found but could not be started.
const EXIT_CANNOT_EXECUTE: i32 = 126;

/// Run one command with explicit control over its descriptors, environment
/// and process attributes, then exit with its status.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Request file (YAML); flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Working directory for the child
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Set an environment variable (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_arg)]
    env: Vec<(String, String)>,

    /// Start from an empty environment
    #[arg(long)]
    clear_env: bool,

    /// Close all descriptors above 2 in the child
    #[arg(long)]
    close_fds: bool,

    /// Signal the child receives when this process dies (0 disables)
    #[arg(long, value_name = "N")]
    death_signal: Option<i32>,

    /// File-creation mask for the child, in octal
    #[arg(long, value_name = "OCTAL", value_parser = parse_umask_arg)]
    umask: Option<u32>,

    /// Give the child the default SIGPIPE disposition
    #[arg(long)]
    restore_sigpipe: bool,

    #[arg(long, value_enum)]
    stdin: Option<StreamChoice>,

    #[arg(long, value_enum)]
    stdout: Option<StreamChoice>,

    #[arg(long, value_enum)]
    stderr: Option<StreamChoice>,

    /// Print a JSON report on stdout, with piped output captured into it,
    /// instead of relaying piped output as it arrives
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Program and arguments
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    pid: u32,
    spawned_at: DateTime<Utc>,
    status: ExitStatus,
    exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
}

#[derive(Debug, Serialize)]
struct FailureReport {
    error: String,
    stage: Option<String>,
    errno: Option<i32>,
    exit_code: i32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug)?;

    let mut request = match &args.config {
        Some(path) => {
            info!("Request file: {}", path.display());
            RequestFile::load_from_file(path)?
        }
        None => RequestFile::default(),
    };
    apply_overrides(&mut request, &args);
    request.validate()?;

    let code = run(&request, args.json).await?;
    std::process::exit(code);
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}

fn parse_env_arg(value: &str) -> Result<(String, String), String> {
    parse_env_pair(value).map_err(|e| e.to_string())
}

fn parse_umask_arg(value: &str) -> Result<u32, String> {
    parse_umask(value).map_err(|e| e.to_string())
}

fn apply_overrides(request: &mut RequestFile, args: &Args) {
    if !args.command.is_empty() {
        request.args = args.command.clone();
    }
    if let Some(cwd) = &args.cwd {
        request.cwd = Some(cwd.clone());
    }
    request.env.extend(args.env.iter().cloned());
    request.clear_env |= args.clear_env;
    request.close_fds |= args.close_fds;
    request.restore_sigpipe |= args.restore_sigpipe;
    if let Some(signal) = args.death_signal {
        request.death_signal = signal;
    }
    if let Some(mask) = args.umask {
        request.umask = Some(format!("{:o}", mask));
    }
    if let Some(choice) = args.stdin {
        request.stdin = choice;
    }
    if let Some(choice) = args.stdout {
        request.stdout = choice;
    }
    if let Some(choice) = args.stderr {
        request.stderr = choice;
    }
}

/// Spawn, wait, report. Returns the exit code for this process.
async fn run(request: &RequestFile, json: bool) -> Result<i32> {
    let spawn_request = request.to_request()?;

    let mut child = match ProcessHandle::spawn(&spawn_request) {
        Ok(child) => child,
        Err(err) => return Ok(report_failure(&err, json)),
    };
    let pid = child.pid();
    let spawned_at = child.spawned_at();
    info!(pid, command = ?request.args, "Started");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let capture = json && request.has_pipes();
    let work = tokio::task::spawn_blocking(move || {
        if capture {
            child.communicate(None)
        } else {
            relay(&mut child)
        }
    });
    tokio::pin!(work);

    let output: Output = loop {
        tokio::select! {
            joined = &mut work => break joined??,
            _ = sigterm.recv() => forward(pid, Signal::SIGTERM),
            _ = sigint.recv() => forward(pid, Signal::SIGINT),
        }
    };

    let exit_code = output.status.shell_code();
    info!(pid, status = %output.status, "Finished");

    if json {
        let report = RunReport {
            pid,
            spawned_at,
            status: output.status,
            exit_code,
            stdout: piped_text(request.stdout, &output.stdout),
            stderr: piped_text(request.stderr, &output.stderr),
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(exit_code)
}

/// Forward piped streams between the child and this process while it runs,
/// then wait. Nothing is captured.
fn relay(child: &mut ProcessHandle) -> ProcessResult<Output> {
    let pid = child.pid();
    if let Some(mut stdin) = child.stdin.take() {
        // Detached: our own stdin may never reach end-of-file.
        thread::spawn(move || {
            let _ = io::copy(&mut io::stdin(), &mut stdin);
        });
    }
    let stdout = child.stdout.take().map(|out| thread::spawn(move || forward_to(out, io::stdout())));
    let stderr = child.stderr.take().map(|err| thread::spawn(move || forward_to(err, io::stderr())));

    for copier in [stdout, stderr].into_iter().flatten() {
        copier
            .join()
            .map_err(|_| ProcessError::stream_io(pid, "relay thread panicked"))?
            .map_err(|e| ProcessError::stream_io(pid, e.to_string()))?;
    }

    Ok(Output {
        status: child.wait()?,
        stdout: Vec::new(),
        stderr: Vec::new(),
    })
}

fn forward_to<W: Write>(mut from: File, mut to: W) -> io::Result<()> {
    io::copy(&mut from, &mut to)?;
    to.flush()
}

fn forward(pid: u32, signal: Signal) {
    info!(pid, signal = signal.as_str(), "Forwarding signal to child");
    if let Err(e) = send_signal(pid, signal) {
        warn!("{}", e);
    }
}

fn piped_text(choice: StreamChoice, bytes: &[u8]) -> Option<String> {
    (choice == StreamChoice::Pipe).then(|| String::from_utf8_lossy(bytes).into_owned())
}

fn report_failure(err: &SpawnError, json: bool) -> i32 {
    let exit_code = match err.raw_os_error() {
        Some(errno) if errno == Errno::ENOENT as i32 => EXIT_NOT_FOUND,
        _ => EXIT_CANNOT_EXECUTE,
    };
    error!(stage = ?err.stage(), "Spawn failed: {}", err);

    if json {
        let report = FailureReport {
            error: err.to_string(),
            stage: err.stage().map(|stage| stage.to_string()),
            errno: err.raw_os_error(),
            exit_code,
        };
        match serde_json::to_string(&report) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode failure report: {}", e),
        }
    }
    exit_code
}

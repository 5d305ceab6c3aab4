//! Child attributes applied between fork and exec: environment, working
//! directory, umask, death signal, signal mask and SIGPIPE.

use e2e_tests::assertions::{assert_eq_str, assert_output, assert_success};
use e2e_tests::TestExecutor;
use nix::sys::signal::{SigSet, Signal};
use spawnkit_process::{ExitStatus, ProcessHandle, SpawnRequest, StreamSpec};
use std::os::unix::fs::PermissionsExt;
use std::thread;

#[test]
fn test_explicit_environment() {
    let executor = TestExecutor::new("env");
    executor.run_test(|_| {
        let mut child = ProcessHandle::spawn(
            &SpawnRequest::new(["env"])
                .env("key", "value")
                .env("שלום", "עולם"),
        )
        .map_err(|e| e.to_string())?;
        let output = child.communicate(None).map_err(|e| e.to_string())?;
        assert_success(output.status)?;

        let text = String::from_utf8(output.stdout).map_err(|e| e.to_string())?;
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort_unstable();
        let mut expected = vec!["key=value", "שלום=עולם"];
        expected.sort_unstable();
        if lines != expected {
            return Err(format!("Expected {:?}, got {:?}", expected, lines));
        }
        Ok(())
    });
}

#[test]
fn test_inherited_environment() {
    let executor = TestExecutor::new("env-inherit");
    executor.run_test(|_| {
        let path = std::env::var("PATH").map_err(|e| e.to_string())?;
        let mut child =
            ProcessHandle::spawn(&SpawnRequest::new(["printenv", "PATH"])).map_err(|e| e.to_string())?;
        let output = child.communicate(None).map_err(|e| e.to_string())?;
        assert_output(&output, &format!("{}\n", path))
    });
}

#[test]
fn test_working_directory_and_pwd() {
    let executor = TestExecutor::new("cwd");
    executor.run_test(|ctx| {
        let dir = ctx.test_dir().to_string_lossy().into_owned();
        let mut child = ProcessHandle::spawn(
            &SpawnRequest::new(["sh", "-c", "printenv PWD; /bin/pwd -P"]).cwd(ctx.test_dir()),
        )
        .map_err(|e| e.to_string())?;
        let output = child.communicate(None).map_err(|e| e.to_string())?;

        let physical = ctx
            .test_dir()
            .canonicalize()
            .map_err(|e| e.to_string())?
            .to_string_lossy()
            .into_owned();
        assert_output(&output, &format!("{}\n{}\n", dir, physical))
    });
}

#[test]
fn test_umask() {
    let executor = TestExecutor::new("umask");
    executor.run_test(|ctx| {
        let mut child = ProcessHandle::spawn(
            &SpawnRequest::new(["touch", "created"])
                .cwd(ctx.test_dir())
                .umask(0o007),
        )
        .map_err(|e| e.to_string())?;
        assert_success(child.wait().map_err(|e| e.to_string())?)?;

        let mode = std::fs::metadata(ctx.path("created"))
            .map_err(|e| e.to_string())?
            .permissions()
            .mode()
            & 0o777;
        if mode != 0o660 {
            return Err(format!("Expected mode 0660, got {:o}", mode));
        }
        Ok(())
    });
}

/// Spawn `sleep` from a short-lived thread and return its handle after the
/// thread has exited.
fn spawn_from_exiting_thread(death_signal: i32) -> Result<ProcessHandle, String> {
    thread::spawn(move || {
        ProcessHandle::spawn(
            &SpawnRequest::new(["sleep", "30"])
                .stdin(StreamSpec::Null)
                .stdout(StreamSpec::Null)
                .stderr(StreamSpec::Null)
                .death_signal(death_signal),
        )
        .map_err(|e| e.to_string())
    })
    .join()
    .map_err(|_| "spawning thread panicked".to_string())?
}

#[test]
fn test_death_signal_on_thread_exit() {
    let executor = TestExecutor::new("death-signal");
    executor.run_test(|_| {
        let mut child = spawn_from_exiting_thread(Signal::SIGKILL as i32)?;
        let status = child.wait().map_err(|e| e.to_string())?;
        if status.signal() != Some(Signal::SIGKILL as i32) {
            return Err(format!("Expected SIGKILL, got {}", status));
        }
        Ok(())
    });
}

#[test]
fn test_realtime_death_signal_on_thread_exit() {
    let executor = TestExecutor::new("death-signal-rt");
    executor.run_test(|_| {
        let rt = nix::libc::SIGRTMIN() + 2;
        let mut child = spawn_from_exiting_thread(rt)?;
        let status = child.wait().map_err(|e| e.to_string())?;
        if status.signal() != Some(rt) {
            return Err(format!("Expected signal {}, got {}", rt, status));
        }
        Ok(())
    });
}

#[test]
fn test_no_death_signal_by_default() {
    let executor = TestExecutor::new("no-death-signal");
    executor.run_test(|_| {
        let mut child = spawn_from_exiting_thread(0)?;
        thread::sleep(std::time::Duration::from_millis(200));
        if !child.is_alive().map_err(|e| e.to_string())? {
            return Err("Child died with its spawning thread".to_string());
        }
        child.kill().map_err(|e| e.to_string())?;
        child.wait().map_err(|e| e.to_string())?;
        Ok(())
    });
}

#[test]
fn test_signal_mask_is_cleared() {
    let executor = TestExecutor::new("signal-mask");
    executor.run_test(|_| {
        // The spawning thread blocks SIGTERM; the child must not.
        let mut child = thread::spawn(|| {
            let mut blocked = SigSet::empty();
            blocked.add(Signal::SIGTERM);
            blocked.thread_block().map_err(|e| e.to_string())?;
            ProcessHandle::spawn(
                &SpawnRequest::new(["sleep", "30"])
                    .stdin(StreamSpec::Null)
                    .stdout(StreamSpec::Null)
                    .stderr(StreamSpec::Null),
            )
            .map_err(|e| e.to_string())
        })
        .join()
        .map_err(|_| "spawning thread panicked".to_string())??;

        child.terminate().map_err(|e| e.to_string())?;
        let status = child.wait().map_err(|e| e.to_string())?;
        if status.signal() != Some(Signal::SIGTERM as i32) {
            return Err(format!("Expected SIGTERM, got {}", status));
        }
        Ok(())
    });
}

fn write_into_closed_pipe(restore_sigpipe: bool) -> Result<ExitStatus, String> {
    let mut child = ProcessHandle::spawn(
        &SpawnRequest::new(["yes"])
            .stdin(StreamSpec::Null)
            .stderr(StreamSpec::Null)
            .restore_sigpipe(restore_sigpipe),
    )
    .map_err(|e| e.to_string())?;
    drop(child.stdout.take());
    child.wait().map_err(|e| e.to_string())
}

#[test]
fn test_broken_pipe_with_restored_sigpipe() {
    let executor = TestExecutor::new("sigpipe-restored");
    executor.run_test(|_| {
        let status = write_into_closed_pipe(true)?;
        if status.signal() != Some(Signal::SIGPIPE as i32) {
            return Err(format!("Expected SIGPIPE, got {}", status));
        }
        Ok(())
    });
}

#[test]
fn test_broken_pipe_with_inherited_disposition() {
    let executor = TestExecutor::new("sigpipe-inherited");
    executor.run_test(|_| {
        // The test harness ignores SIGPIPE, so the child sees EPIPE instead.
        let status = write_into_closed_pipe(false)?;
        match status {
            ExitStatus::Exited(code) if code != 0 => Ok(()),
            other => Err(format!("Expected a failing exit code, got {}", other)),
        }
    });
}

#[test]
fn test_program_override() {
    let executor = TestExecutor::new("program-override");
    executor.run_test(|_| {
        let mut child = ProcessHandle::spawn(
            &SpawnRequest::new(["custom-name", "-c", "printf %s \"$0\""]).program("sh"),
        )
        .map_err(|e| e.to_string())?;
        let output = child.communicate(None).map_err(|e| e.to_string())?;
        assert_eq_str("argv[0]", &String::from_utf8_lossy(&output.stdout), "custom-name")
    });
}

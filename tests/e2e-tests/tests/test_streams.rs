//! Standard stream wiring: pipes, inheritance, files and pipelines.

use e2e_tests::assertions::{assert_eq_str, assert_output, assert_success};
use e2e_tests::TestExecutor;
use spawnkit_process::{ProcessHandle, SpawnRequest, StreamSpec};
use std::fs::File;
use std::io::Read;

#[test]
fn test_echo_through_pipe() {
    let executor = TestExecutor::new("echo");
    executor.run_test(|_| {
        let mut child = ProcessHandle::spawn(&SpawnRequest::new(["echo", "-n", "hello"]))
            .map_err(|e| e.to_string())?;
        let output = child.communicate(None).map_err(|e| e.to_string())?;
        assert_output(&output, "hello")
    });
}

#[test]
fn test_cat_round_trip() {
    let executor = TestExecutor::new("cat");
    executor.run_test(|_| {
        let mut child = ProcessHandle::spawn(&SpawnRequest::new(["cat"])).map_err(|e| e.to_string())?;
        let output = child
            .communicate(Some("שלום, world\n".as_bytes()))
            .map_err(|e| e.to_string())?;
        assert_output(&output, "שלום, world\n")
    });
}

#[test]
fn test_no_streams() {
    let executor = TestExecutor::new("no-streams");
    executor.run_test(|_| {
        let mut child = ProcessHandle::spawn(
            &SpawnRequest::new(["true"])
                .stdin(StreamSpec::Inherit)
                .stdout(StreamSpec::Inherit)
                .stderr(StreamSpec::Inherit),
        )
        .map_err(|e| e.to_string())?;

        if child.stdin.is_some() || child.stdout.is_some() || child.stderr.is_some() {
            return Err("Unexpected parent stream ends".to_string());
        }
        assert_success(child.wait().map_err(|e| e.to_string())?)
    });
}

#[test]
fn test_only_stderr_piped() {
    let executor = TestExecutor::new("stderr-only");
    executor.run_test(|_| {
        let mut child = ProcessHandle::spawn(
            &SpawnRequest::new(["sh", "-c", "echo out; echo err >&2"])
                .stdin(StreamSpec::Null)
                .stdout(StreamSpec::Null),
        )
        .map_err(|e| e.to_string())?;
        let output = child.communicate(None).map_err(|e| e.to_string())?;
        assert_success(output.status)?;
        assert_eq_str("stdout", &String::from_utf8_lossy(&output.stdout), "")?;
        assert_eq_str("stderr", &String::from_utf8_lossy(&output.stderr), "err\n")
    });
}

#[test]
fn test_stdout_and_stderr_to_same_file() {
    let executor = TestExecutor::new("same-file");
    executor.run_test(|ctx| {
        let file = File::create(ctx.path("both.log")).map_err(|e| e.to_string())?;
        let mut child = ProcessHandle::spawn(
            &SpawnRequest::new(["sh", "-c", "echo one; echo two >&2; echo three"])
                .stdin(StreamSpec::Null)
                .stdout(StreamSpec::from_fd(&file))
                .stderr(StreamSpec::from_fd(&file)),
        )
        .map_err(|e| e.to_string())?;
        assert_success(child.wait().map_err(|e| e.to_string())?)?;
        drop(file);

        assert_eq_str("log", &ctx.read("both.log")?, "one\ntwo\nthree\n")
    });
}

#[test]
fn test_stdin_from_file() {
    let executor = TestExecutor::new("stdin-file");
    executor.run_test(|ctx| {
        std::fs::write(ctx.path("input.txt"), "from a file\n").map_err(|e| e.to_string())?;
        let input = File::open(ctx.path("input.txt")).map_err(|e| e.to_string())?;

        let mut child = ProcessHandle::spawn(&SpawnRequest::new(["cat"]).stdin(StreamSpec::from_fd(&input)))
            .map_err(|e| e.to_string())?;
        let output = child.communicate(None).map_err(|e| e.to_string())?;
        assert_output(&output, "from a file\n")
    });
}

#[test]
fn test_pipeline() {
    let executor = TestExecutor::new("pipeline");
    executor.run_test(|_| {
        // tr a-z A-Z < producer | consumer, wired by hand.
        let mut consumer =
            ProcessHandle::spawn(&SpawnRequest::new(["tr", "a-z", "A-Z"])).map_err(|e| e.to_string())?;
        let consumer_stdin = consumer.stdin.take().ok_or("consumer has no stdin pipe")?;

        let mut producer = ProcessHandle::spawn(
            &SpawnRequest::new(["echo", "pipeline works"])
                .stdin(StreamSpec::Null)
                .stdout(StreamSpec::from_fd(&consumer_stdin)),
        )
        .map_err(|e| e.to_string())?;
        // Only the producer may hold the write end now.
        drop(consumer_stdin);
        assert_success(producer.wait().map_err(|e| e.to_string())?)?;

        let mut out = String::new();
        consumer
            .stdout
            .take()
            .ok_or("consumer has no stdout pipe")?
            .read_to_string(&mut out)
            .map_err(|e| e.to_string())?;
        assert_success(consumer.wait().map_err(|e| e.to_string())?)?;
        assert_eq_str("pipeline output", &out, "PIPELINE WORKS\n")
    });
}

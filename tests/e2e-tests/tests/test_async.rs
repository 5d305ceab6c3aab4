//! Tokio conversion of spawned children.

use spawnkit_process::{ExitStatus, ProcessHandle, SpawnRequest, StreamSpec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_async_streams_and_wait() {
    e2e_tests::banner("Async streams");

    let mut child = ProcessHandle::spawn(&SpawnRequest::new(["tr", "a-z", "A-Z"])).unwrap();
    let mut streams = child.take_async_streams().unwrap();

    let mut stdin = streams.stdin.take().unwrap();
    let mut stdout = streams.stdout.take().unwrap();
    let writer = tokio::spawn(async move {
        stdin.write_all(b"async pipes").await.unwrap();
    });

    let mut out = String::new();
    let (read, written) = tokio::join!(stdout.read_to_string(&mut out), writer);
    read.unwrap();
    written.unwrap();

    assert_eq!(out, "ASYNC PIPES");
    assert_eq!(child.wait_async().await.unwrap(), ExitStatus::Exited(0));
}

#[tokio::test]
async fn test_concurrent_async_waits() {
    e2e_tests::banner("Concurrent async waits");

    let spawn = |code: i32| {
        ProcessHandle::spawn(
            &SpawnRequest::new(["sh", "-c", &format!("sleep 0.2; exit {}", code)])
                .stdin(StreamSpec::Null)
                .stdout(StreamSpec::Null)
                .stderr(StreamSpec::Null),
        )
        .unwrap()
    };
    let (mut a, mut b, mut c) = (spawn(1), spawn(2), spawn(3));

    let (sa, sb, sc) = tokio::join!(a.wait_async(), b.wait_async(), c.wait_async());
    assert_eq!(sa.unwrap(), ExitStatus::Exited(1));
    assert_eq!(sb.unwrap(), ExitStatus::Exited(2));
    assert_eq!(sc.unwrap(), ExitStatus::Exited(3));
}

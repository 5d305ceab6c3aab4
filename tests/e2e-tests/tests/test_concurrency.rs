//! Many threads spawning at once.

use e2e_tests::assertions::{assert_eq_str, assert_output, assert_success};
use e2e_tests::TestExecutor;
use spawnkit_process::{ProcessHandle, SpawnRequest, StreamSpec};
use std::fs::OpenOptions;
use std::thread;

const THREADS: usize = 8;
const SPAWNS_PER_THREAD: usize = 16;

#[test]
fn test_parallel_spawns_keep_their_pipes_apart() {
    let executor = TestExecutor::new("parallel-pipes");
    executor.run_test(|_| {
        thread::scope(|scope| {
            let workers: Vec<_> = (0..THREADS)
                .map(|t| {
                    scope.spawn(move || -> Result<(), String> {
                        for i in 0..SPAWNS_PER_THREAD {
                            let tag = format!("{}-{}", t, i);
                            let mut child = ProcessHandle::spawn(&SpawnRequest::new(["cat"]).close_fds(i % 2 == 0))
                                .map_err(|e| e.to_string())?;
                            let output = child.communicate(Some(tag.as_bytes())).map_err(|e| e.to_string())?;
                            assert_output(&output, &tag)?;
                        }
                        Ok(())
                    })
                })
                .collect();

            for worker in workers {
                worker.join().map_err(|_| "worker panicked".to_string())??;
            }
            println!("✓ {} children, no crossed streams", THREADS * SPAWNS_PER_THREAD);
            Ok(())
        })
    });
}

#[test]
fn test_parallel_spawns_share_a_caller_descriptor() {
    let executor = TestExecutor::new("parallel-shared-fd");
    executor.run_test(|ctx| {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(ctx.path("shared.log"))
            .map_err(|e| e.to_string())?;

        thread::scope(|scope| {
            let workers: Vec<_> = (0..THREADS)
                .map(|t| {
                    let log = &log;
                    scope.spawn(move || -> Result<(), String> {
                        for _ in 0..SPAWNS_PER_THREAD {
                            let mut child = ProcessHandle::spawn(
                                &SpawnRequest::new(["echo", &format!("line from {}", t)])
                                    .stdin(StreamSpec::Null)
                                    .stdout(StreamSpec::from_fd(log)),
                            )
                            .map_err(|e| e.to_string())?;
                            assert_success(child.wait().map_err(|e| e.to_string())?)?;
                        }
                        Ok(())
                    })
                })
                .collect();

            for worker in workers {
                worker.join().map_err(|_| "worker panicked".to_string())??;
            }
            Ok::<(), String>(())
        })?;
        drop(log);

        let content = ctx.read("shared.log")?;
        let lines = content.lines().count();
        assert_eq_str(
            "line count",
            &lines.to_string(),
            &(THREADS * SPAWNS_PER_THREAD).to_string(),
        )
    });
}

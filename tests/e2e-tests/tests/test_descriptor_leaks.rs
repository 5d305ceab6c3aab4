//! The parent's descriptor table is the same before and after a spawn,
//! whether it succeeds or fails.
//!
//! Kept in its own test binary with a single test: any other test running
//! in parallel would open descriptors of its own.

use e2e_tests::fds::open_fds;
use e2e_tests::TestExecutor;
use spawnkit_process::{ProcessHandle, SpawnRequest, StreamSpec};

const ROUNDS: usize = 25;

#[test]
fn test_no_descriptor_leaks() {
    let executor = TestExecutor::new("fd-leaks");
    executor.run_test(|ctx| {
        let me = std::process::id();
        // Warm up lazily created state (capability probe, tracing).
        let mut child = ProcessHandle::spawn(&SpawnRequest::new(["true"])).map_err(|e| e.to_string())?;
        child.wait().map_err(|e| e.to_string())?;
        drop(child);
        let before = open_fds(me)?;

        for round in 0..ROUNDS {
            let mut child = ProcessHandle::spawn(&SpawnRequest::new(["echo", "x"]).stderr(StreamSpec::Null))
                .map_err(|e| e.to_string())?;
            child.communicate(None).map_err(|e| e.to_string())?;

            let failed = ProcessHandle::spawn(
                &SpawnRequest::new(["true"])
                    .stdin(StreamSpec::Null)
                    .cwd(ctx.path("missing")),
            );
            if failed.is_ok() {
                return Err(format!("round {}: spawn into a missing directory succeeded", round));
            }

            let failed = ProcessHandle::spawn(&SpawnRequest::new(["no-such-program-for-spawnkit"]));
            if failed.is_ok() {
                return Err(format!("round {}: missing program spawned", round));
            }
        }

        let after = open_fds(me)?;
        if before != after {
            return Err(format!("Descriptor table changed: {:?} -> {:?}", before, after));
        }
        println!("✓ {} descriptors before and after", before.len());
        Ok(())
    });
}

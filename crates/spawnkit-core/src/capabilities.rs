//! Platform capabilities, probed once per process.
//!
//! The child branch must not probe anything itself, so every quirk that
//! decides how a step is carried out is resolved here, in the parent, the
//! first time a spawn happens.

use crate::fd::FIRST_NON_STD_FD;
use nix::sys::resource::{getrlimit, Resource};
use once_cell::sync::Lazy;
use std::os::fd::RawFd;
use tracing::debug;

/// Kernel default for `fs.nr_open`, used when it cannot be read.
const DEFAULT_NR_OPEN: RawFd = 1 << 20;

const NR_OPEN_PATH: &str = "/proc/sys/fs/nr_open";

/// What the running kernel supports for child setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `close_range(2)` is available.
    pub close_range: bool,
    /// Exclusive upper bound for descriptor numbers when closing one by one.
    /// System-wide, so raising `RLIMIT_NOFILE` later cannot exceed it.
    pub max_fd: RawFd,
}

static CAPABILITIES: Lazy<Capabilities> = Lazy::new(Capabilities::detect);

/// The capabilities of this process, detected on first use.
pub fn capabilities() -> &'static Capabilities {
    &CAPABILITIES
}

impl Capabilities {
    /// Probe the kernel. Prefer [`capabilities`], which caches the result.
    pub fn detect() -> Self {
        let caps = Self {
            close_range: probe_close_range(),
            max_fd: descriptor_ceiling(),
        };
        debug!(
            close_range = caps.close_range,
            max_fd = caps.max_fd,
            "Detected spawn capabilities"
        );
        caps
    }
}

fn probe_close_range() -> bool {
    // The highest possible descriptor is never open, so this closes nothing.
    // SAFETY: plain system call on integer arguments.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            libc::c_uint::MAX,
            libc::c_uint::MAX,
            0 as libc::c_uint,
        )
    };
    ret == 0
}

/// `fs.nr_open` caps every process's `RLIMIT_NOFILE`, so no descriptor can
/// ever be numbered at or above it.
fn descriptor_ceiling() -> RawFd {
    let nr_open = std::fs::read_to_string(NR_OPEN_PATH)
        .ok()
        .and_then(|text| text.trim().parse::<RawFd>().ok());
    if let Some(ceiling) = nr_open {
        return ceiling.max(FIRST_NON_STD_FD);
    }

    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((_soft, hard)) if hard != libc::RLIM_INFINITY => RawFd::try_from(hard)
            .unwrap_or(DEFAULT_NR_OPEN)
            .max(DEFAULT_NR_OPEN),
        _ => DEFAULT_NR_OPEN,
    }
}

//! Descriptor plan: which descriptor each standard stream of the child gets,
//! which end the parent keeps, and who owns what.
//!
//! Ownership rules:
//! - descriptors created here (pipe ends, `/dev/null`, duplicated
//!   temporaries) are owned by the plan and closed when it is dropped;
//! - descriptors supplied by the caller are only ever borrowed and are
//!   never closed by this crate, on any path.

use crate::fd::{dup_above_std, is_open, lift_above_std, open_null, FIRST_NON_STD_FD};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use spawnkit_common::{SpawnError, SpawnResult, StdStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use tracing::debug;

/// What the child should get on one standard stream.
#[derive(Debug, Clone, Copy, Default)]
pub enum StreamSpec<'a> {
    /// Keep whatever the parent has on the same slot.
    Inherit,
    /// Connect to `/dev/null`.
    Null,
    /// Create a new pipe; the parent keeps the other end.
    #[default]
    Pipe,
    /// A caller-owned descriptor, by number.
    Descriptor(RawFd),
    /// A caller-owned open file, socket or pipe end.
    Stream(BorrowedFd<'a>),
}

impl<'a> StreamSpec<'a> {
    /// Borrow anything that owns a descriptor (a `File`, a pipe end, ...).
    pub fn from_fd<F: AsFd>(file: &'a F) -> Self {
        StreamSpec::Stream(file.as_fd())
    }

    /// Whether the descriptor behind this spec belongs to the caller.
    pub fn is_caller_owned(&self) -> bool {
        matches!(self, StreamSpec::Descriptor(_) | StreamSpec::Stream(_))
    }

    fn caller_fd(&self) -> Option<RawFd> {
        match self {
            StreamSpec::Descriptor(fd) => Some(*fd),
            StreamSpec::Stream(fd) => Some(fd.as_raw_fd()),
            _ => None,
        }
    }
}

/// Which side of the fork a close list is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Parent,
    Child,
}

#[derive(Debug)]
enum ChildEnd {
    None,
    Owned(OwnedFd),
    Caller(RawFd),
}

impl ChildEnd {
    fn raw(&self) -> Option<RawFd> {
        match self {
            ChildEnd::None => None,
            ChildEnd::Owned(fd) => Some(fd.as_raw_fd()),
            ChildEnd::Caller(fd) => Some(*fd),
        }
    }
}

#[derive(Debug)]
struct StreamSlot {
    child: ChildEnd,
    parent: Option<OwnedFd>,
}

impl StreamSlot {
    const EMPTY: StreamSlot = StreamSlot {
        child: ChildEnd::None,
        parent: None,
    };
}

/// Per-stream descriptor pairs for one spawn.
#[derive(Debug)]
pub struct DescriptorPlan {
    slots: [StreamSlot; 3],
}

impl DescriptorPlan {
    /// Build the plan for stdin, stdout and stderr.
    ///
    /// Fails with [`SpawnError::Resource`] if a pipe or `/dev/null` cannot be
    /// opened, and with [`SpawnError::Validation`] if a caller descriptor is
    /// not open. Anything created before the failure is closed again.
    pub fn new(specs: [StreamSpec<'_>; 3]) -> SpawnResult<Self> {
        let mut plan = DescriptorPlan {
            slots: [StreamSlot::EMPTY, StreamSlot::EMPTY, StreamSlot::EMPTY],
        };

        for stream in StdStream::ALL {
            plan.slots[stream.index()] = Self::plan_stream(stream, &specs[stream.index()])?;
        }

        debug!(
            child = ?plan.child_fds(),
            parent = ?plan.parent_fds(),
            "Built descriptor plan"
        );
        Ok(plan)
    }

    fn plan_stream(stream: StdStream, spec: &StreamSpec<'_>) -> SpawnResult<StreamSlot> {
        let slot = match spec {
            StreamSpec::Inherit => StreamSlot::EMPTY,
            StreamSpec::Null => StreamSlot {
                child: ChildEnd::Owned(
                    open_null().map_err(|errno| SpawnError::resource("/dev/null", errno))?,
                ),
                parent: None,
            },
            StreamSpec::Pipe => {
                let (read, write) = new_pipe()?;
                if stream.is_input() {
                    StreamSlot {
                        child: ChildEnd::Owned(read),
                        parent: Some(write),
                    }
                } else {
                    StreamSlot {
                        child: ChildEnd::Owned(write),
                        parent: Some(read),
                    }
                }
            }
            StreamSpec::Descriptor(_) | StreamSpec::Stream(_) => {
                let fd = spec.caller_fd().unwrap_or(-1);
                if fd < 0 || !is_open(fd) {
                    return Err(SpawnError::validation(format!(
                        "{} descriptor {} is not open",
                        stream, fd
                    )));
                }
                if fd < FIRST_NON_STD_FD && fd != stream.fileno() {
                    // Another standard slot may be overwritten before this
                    // one is redirected, so redirect from a private copy.
                    let copy =
                        dup_above_std(fd).map_err(|errno| SpawnError::resource("descriptor", errno))?;
                    StreamSlot {
                        child: ChildEnd::Owned(copy),
                        parent: None,
                    }
                } else {
                    StreamSlot {
                        child: ChildEnd::Caller(fd),
                        parent: None,
                    }
                }
            }
        };
        Ok(slot)
    }

    /// Descriptor to install on each standard slot in the child.
    pub fn child_fds(&self) -> [Option<RawFd>; 3] {
        StdStream::ALL.map(|s| self.slots[s.index()].child.raw())
    }

    /// Parent-side pipe ends, by number.
    pub fn parent_fds(&self) -> [Option<RawFd>; 3] {
        StdStream::ALL.map(|s| self.slots[s.index()].parent.as_ref().map(|fd| fd.as_raw_fd()))
    }

    /// Whether a pipe was created for `stream`.
    pub fn has_pipe(&self, stream: StdStream) -> bool {
        self.slots[stream.index()].parent.is_some()
    }

    /// Caller-owned descriptors referenced by this plan, each listed once.
    pub fn caller_fds(&self) -> Vec<RawFd> {
        let mut fds: Vec<RawFd> = self
            .slots
            .iter()
            .filter_map(|slot| match slot.child {
                ChildEnd::Caller(fd) => Some(fd),
                _ => None,
            })
            .collect();
        fds.sort_unstable();
        fds.dedup();
        fds
    }

    /// Descriptors each side must close once the fork has happened.
    ///
    /// The parent closes the operation-owned ends it handed to the child;
    /// the child closes the ends the parent keeps. Caller-owned descriptors
    /// never appear, and no descriptor appears twice.
    pub fn close_list(&self, side: Side) -> Vec<RawFd> {
        let mut fds: Vec<RawFd> = match side {
            Side::Parent => self
                .slots
                .iter()
                .filter_map(|slot| match &slot.child {
                    ChildEnd::Owned(fd) => Some(fd.as_raw_fd()),
                    _ => None,
                })
                .collect(),
            Side::Child => self.parent_fds().into_iter().flatten().collect(),
        };
        fds.sort_unstable();
        fds.dedup();
        fds
    }

    /// Close the operation-owned child ends in the parent after fork.
    pub fn release_child_ends(&mut self) {
        for slot in &mut self.slots {
            if matches!(slot.child, ChildEnd::Owned(_)) {
                slot.child = ChildEnd::None;
            }
        }
    }

    /// Hand the parent-side ends over to the caller.
    pub fn into_parent_ends(self) -> [Option<OwnedFd>; 3] {
        let [stdin, stdout, stderr] = self.slots;
        [stdin.parent, stdout.parent, stderr.parent]
    }
}

fn new_pipe() -> SpawnResult<(OwnedFd, OwnedFd)> {
    let (read, write) =
        pipe2(OFlag::O_CLOEXEC).map_err(|errno| SpawnError::resource("pipe", errno))?;
    let read = lift_above_std(read).map_err(|errno| SpawnError::resource("pipe", errno))?;
    let write = lift_above_std(write).map_err(|errno| SpawnError::resource("pipe", errno))?;
    Ok((read, write))
}

//! Process lifecycle management
//!
//! Owns the process table, the parent–child relation and the two handoffs
//! that make launch and wait deterministic:
//!
//! - **load rendezvous**: one per launch. The launcher blocks on it; the
//!   child signals it once its load attempt is over.
//! - **exit rendezvous**: one per process. The child signals it with its
//!   exit status; the parent's single legal wait drains it.
//!
//! # Lock ordering
//! There is none to get wrong: the process table lock and a rendezvous
//! lock are never held together, and neither is held while blocking or
//! while calling into a collaborator.

use core::fmt;

pub mod lifecycle;
pub mod rendezvous;
pub mod table;

pub use lifecycle::LaunchError;
pub use rendezvous::OneShot;
pub use table::{AllocError, LoadState, Process, ProcessTable};

/// Process identifier: monotonic, never reused.
///
/// A newtype over the ABI's `pid_t` so raw integers are not mistaken for
/// pids. `-1` is the failure sentinel and never names a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(i32);

impl Pid {
    /// The kernel's initial pseudo-process, parent of the first program.
    pub const INIT: Pid = Pid(1);

    /// First pid handed to a user program.
    pub const FIRST_USER: Pid = Pid(2);

    /// Reconstruct a `Pid` from its raw ABI value.
    pub const fn from_raw(raw: i32) -> Self {
        Pid(raw)
    }

    /// Extract the raw ABI value.
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

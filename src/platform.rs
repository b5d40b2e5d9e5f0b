//! External collaborators
//!
//! The trap layer does not schedule, load binaries, drive devices or own a
//! file system. It reaches all of those through the traits in this module,
//! bundled into a [`Platform`] that the [`Kernel`](crate::Kernel) is built
//! with.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::loader::{LoadError, LoadedImage};
use crate::mm::AddressSpace;
use crate::process::Pid;

/// The scheduler refused to create a new thread of control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnError;

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no thread of control available")
    }
}

/// Thread-of-control primitives the lifecycle handoffs are built on.
///
/// # Contract
/// - `unblock(pid)` issued before `pid` reaches `block_current()` must not be
///   lost: the next `block_current()` of that thread returns immediately.
/// - `block_current()` may return spuriously; callers re-check their
///   condition.
pub trait Scheduler: Send + Sync {
    /// Start `entry` as the thread of control of process `pid`.
    fn spawn(
        &self,
        pid: Pid,
        name: &str,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<(), SpawnError>;

    /// Suspend the calling thread until it is unblocked.
    fn block_current(&self);

    /// Make `pid` runnable again.
    fn unblock(&self, pid: Pid);

    /// Give up the processor.
    fn yield_now(&self);
}

/// Maps an executable image into a fresh address space.
pub trait Loader: Send + Sync {
    /// Load `argv[0]` into `space` and build its initial stack from `argv`.
    fn load(&self, argv: &[String], space: &mut AddressSpace) -> Result<LoadedImage, LoadError>;
}

/// Console byte transport: keyboard in, screen out.
pub trait Console: Send + Sync {
    /// Block until one input byte is available and return it.
    fn read_byte(&self) -> u8;

    /// Write `bytes` as one uninterrupted unit.
    fn write_bytes(&self, bytes: &[u8]);
}

/// The file system calls are forwarded here untouched.
///
/// Every call carries the pid of the caller so the implementation can keep
/// per-process descriptor state.
pub trait FileSystem: Send + Sync {
    fn create(&self, pid: Pid, name: &str, initial_size: u32) -> bool;
    fn remove(&self, pid: Pid, name: &str) -> bool;
    fn open(&self, pid: Pid, name: &str) -> i32;
    fn filesize(&self, pid: Pid, fd: i32) -> i32;
    fn seek(&self, pid: Pid, fd: i32, position: u32);
    fn tell(&self, pid: Pid, fd: i32) -> u32;
    fn close(&self, pid: Pid, fd: i32);

    /// Drop everything held on behalf of `pid`. Called once, at termination.
    fn release(&self, _pid: Pid) {}
}

/// Placeholder file system: creation and removal report success, nothing
/// can be opened.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFileSystem;

impl FileSystem for NullFileSystem {
    fn create(&self, _pid: Pid, _name: &str, _initial_size: u32) -> bool {
        true
    }

    fn remove(&self, _pid: Pid, _name: &str) -> bool {
        true
    }

    fn open(&self, _pid: Pid, _name: &str) -> i32 {
        -1
    }

    fn filesize(&self, _pid: Pid, _fd: i32) -> i32 {
        0
    }

    fn seek(&self, _pid: Pid, _fd: i32, _position: u32) {}

    fn tell(&self, _pid: Pid, _fd: i32) -> u32 {
        0
    }

    fn close(&self, _pid: Pid, _fd: i32) {}
}

/// Machine power control.
pub trait Machine: Send + Sync {
    fn power_off(&self);
}

/// Everything the kernel needs from the outside world.
#[derive(Clone)]
pub struct Platform {
    pub scheduler: Arc<dyn Scheduler>,
    pub loader: Arc<dyn Loader>,
    pub console: Arc<dyn Console>,
    pub files: Arc<dyn FileSystem>,
    pub machine: Arc<dyn Machine>,
}

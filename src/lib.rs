//! Usergate - the user/kernel boundary of a teaching kernel
//!
//! Everything a user program can ask of the kernel goes through here:
//! validation of user pointers, system call dispatch, and the process
//! lifecycle (launch, wait, terminate) with its parent–child handoffs.
//!
//! # Security Features
//! - Every user address is checked over its full span before use
//! - Invalid input kills the caller with -1, never the kernel
//! - Typed validated buffers: handlers cannot touch unchecked user memory
//! - The process table lock is never held across a block
//!
//! # Architecture
//! - `no_std` + `alloc`; scheduling, loading, devices and the file system
//!   are collaborators behind the traits in [`platform`]
//! - Feature `std`: a hosted platform where each process is a host thread

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod drivers;
pub mod kernel;
pub mod loader;
pub mod mm;
pub mod platform;
pub mod process;
pub mod programs;
pub mod syscall;
pub mod trap;
pub mod user;

#[cfg(any(test, feature = "std"))]
pub mod hosted;

pub use kernel::{Kernel, KernelConfig};
pub use loader::{LoadError, LoadedImage, ProgramTable};
pub use platform::{Console, FileSystem, Loader, Machine, NullFileSystem, Platform, Scheduler, SpawnError};
pub use process::{LaunchError, Pid};
pub use syscall::{Fault, Syscall};
pub use trap::{Stopped, TrapCause, TrapFrame};
pub use user::{Program, Syscalls};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Trap Handling
//!
//! The single entry point from user mode into the kernel.
//!
//! # Trap Causes
//! - Syscall: the program pushed an opcode frame and trapped
//! - Page fault: a user-mode load or store touched a page it may not
//!
//! # Security Considerations
//! - Every trap from user mode is checked for a halted machine first
//! - A user page fault terminates the faulting process with -1; it never
//!   reaches the kernel's own state

use alloc::sync::Arc;
use core::fmt;

use crate::kernel::Kernel;
use crate::mm::VirtAddr;
use crate::process::Pid;
use crate::syscall::{self, Access};

/// Register state saved at a trap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// User stack pointer; for a syscall it points at the opcode word.
    pub esp: u32,
    /// Return value register.
    pub eax: u32,
}

impl TrapFrame {
    pub const fn new(esp: u32) -> Self {
        Self { esp, eax: 0 }
    }
}

/// Why user mode entered the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    Syscall,
    PageFault { addr: VirtAddr, access: Access },
}

/// The calling process no longer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stopped {
    /// Terminated with this exit status.
    Exited(i32),
    /// The machine was powered off.
    Halted,
}

impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(status) => write!(f, "exited with status {}", status),
            Self::Halted => write!(f, "machine halted"),
        }
    }
}

impl Kernel {
    /// Handle a trap from user mode.
    ///
    /// Returns `Ok(())` when the process may resume, otherwise why it
    /// stopped.
    pub fn trap(self: &Arc<Self>, pid: Pid, cause: TrapCause, frame: &mut TrapFrame) -> Result<(), Stopped> {
        if self.is_halted() {
            return Err(Stopped::Halted);
        }

        match cause {
            TrapCause::Syscall => syscall::dispatch(self, pid, frame),
            TrapCause::PageFault { addr, access } => {
                log::warn!("[TRAP] pid {} page fault at {} ({:?}), terminating", pid, addr, access);
                self.terminate(pid, -1);
                Err(Stopped::Exited(-1))
            }
        }
    }
}

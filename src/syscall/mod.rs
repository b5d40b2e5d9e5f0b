//! System Call Interface
//!
//! The kernel side of the trap ABI: user programs push an opcode word and
//! its argument words onto their stack and trap; the dispatcher validates
//! the frame, runs the handler and stores the result in `eax`.
//!
//! # Security Model
//! - Whitelist approach: only opcodes in the syscall table are accepted
//! - All pointers are validated over their full span before use
//! - Invalid inputs terminate the caller with -1, never panic the kernel
//!
//! # Current Syscalls
//! - 0: halt() - power off the machine
//! - 1: exit(status) - terminate the current process
//! - 2: exec(cmd_line) - launch a program, returns its pid or -1
//! - 3: wait(pid) - wait for a child, returns its status or -1
//! - 4..=12: create, remove, open, filesize, read, write, seek, tell, close
//! - 20: fibonacci(n)
//! - 21: max_of_four_int(a, b, c, d)

mod handler;
pub mod validate;

pub use handler::{dispatch, fibonacci, max_of_four_int, Syscall, SyscallArgs, MAX_ARGS, STDIN_FILENO, STDOUT_FILENO};
pub use validate::{Access, AddressSpan, Fault, UserBuffer, UserBufferMut};

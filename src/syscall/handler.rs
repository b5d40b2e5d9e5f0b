//! System Call Handler
//!
//! Decodes a trap frame, dispatches it through the syscall table and
//! implements the individual handlers.
//!
//! # Security Considerations
//! - The opcode word is validated before it is read
//! - Unknown opcodes are a fault, not an error code
//! - Every argument slot the call needs is validated before any is decoded
//! - Pointer arguments are validated over their whole span before use

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::drivers::console;
use crate::kernel::Kernel;
use crate::mm::VirtAddr;
use crate::process::Pid;
use crate::trap::{Stopped, TrapFrame};

use super::validate::{self, Fault};

/// System call numbers
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Wait = 3,
    Create = 4,
    Remove = 5,
    Open = 6,
    Filesize = 7,
    Read = 8,
    Write = 9,
    Seek = 10,
    Tell = 11,
    Close = 12,
    Fibonacci = 20,
    MaxOfFourInt = 21,
}

impl Syscall {
    /// Raw opcode as pushed by user code.
    pub const fn number(self) -> u32 {
        self as u32
    }

    /// Look up an opcode.
    pub fn from_raw(nr: u32) -> Option<Self> {
        lookup(nr).map(|entry| entry.call)
    }

    /// Number of argument words the call takes.
    pub fn arity(self) -> usize {
        lookup(self.number()).map_or(0, |entry| entry.arity)
    }
}

/// Maximum arity of any call.
pub const MAX_ARGS: usize = 4;

/// Standard input descriptor
pub const STDIN_FILENO: i32 = 0;
/// Standard output descriptor
pub const STDOUT_FILENO: i32 = 1;

/// Why a handler stopped short of returning a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trap {
    /// Invalid user input: the caller dies with -1.
    Fault(Fault),
    /// The caller asked to exit.
    Exit(i32),
    /// The caller asked to power off.
    Halt,
}

impl From<Fault> for Trap {
    fn from(fault: Fault) -> Self {
        Trap::Fault(fault)
    }
}

/// `Ok(Some(v))` stores `v` into `eax`, `Ok(None)` leaves it alone.
type SyscallResult = Result<Option<u32>, Trap>;

type Handler = fn(&Arc<Kernel>, Pid, &SyscallArgs) -> SyscallResult;

struct SyscallEntry {
    call: Syscall,
    arity: usize,
    handler: Handler,
}

static SYSCALL_TABLE: [SyscallEntry; 15] = [
    SyscallEntry { call: Syscall::Halt, arity: 0, handler: sys_halt },
    SyscallEntry { call: Syscall::Exit, arity: 1, handler: sys_exit },
    SyscallEntry { call: Syscall::Exec, arity: 1, handler: sys_exec },
    SyscallEntry { call: Syscall::Wait, arity: 1, handler: sys_wait },
    SyscallEntry { call: Syscall::Create, arity: 2, handler: sys_create },
    SyscallEntry { call: Syscall::Remove, arity: 1, handler: sys_remove },
    SyscallEntry { call: Syscall::Open, arity: 1, handler: sys_open },
    SyscallEntry { call: Syscall::Filesize, arity: 1, handler: sys_filesize },
    SyscallEntry { call: Syscall::Read, arity: 3, handler: sys_read },
    SyscallEntry { call: Syscall::Write, arity: 3, handler: sys_write },
    SyscallEntry { call: Syscall::Seek, arity: 2, handler: sys_seek },
    SyscallEntry { call: Syscall::Tell, arity: 1, handler: sys_tell },
    SyscallEntry { call: Syscall::Close, arity: 1, handler: sys_close },
    SyscallEntry { call: Syscall::Fibonacci, arity: 1, handler: sys_fibonacci },
    SyscallEntry { call: Syscall::MaxOfFourInt, arity: 4, handler: sys_max_of_four_int },
];

fn lookup(nr: u32) -> Option<&'static SyscallEntry> {
    SYSCALL_TABLE.iter().find(|entry| entry.call.number() == nr)
}

/// Arguments of one call, decoded after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs {
    call: Syscall,
    words: [u32; MAX_ARGS],
    arity: usize,
}

impl SyscallArgs {
    /// Validate and decode the frame at `esp`.
    ///
    /// # Security
    /// The opcode slot is validated before it is read; the argument slots
    /// are validated against the table's arity before any is read.
    fn decode(
        space: &crate::mm::AddressSpace,
        esp: VirtAddr,
    ) -> Result<(&'static SyscallEntry, Self), Fault> {
        validate::validate_frame(space, esp, 0)?;
        let nr = validate::read_word(space, esp)?;
        let entry = lookup(nr).ok_or(Fault::UnknownSyscall(nr))?;

        validate::validate_frame(space, esp, entry.arity)?;
        let mut words = [0u32; MAX_ARGS];
        for (i, word) in words.iter_mut().enumerate().take(entry.arity) {
            // Slots were validated above, so these additions cannot wrap.
            let slot = VirtAddr::new(esp.as_u32() + (i as u32 + 1) * crate::mm::WORD_SIZE);
            *word = validate::read_word(space, slot)?;
        }

        Ok((
            entry,
            Self {
                call: entry.call,
                words,
                arity: entry.arity,
            },
        ))
    }

    pub fn call(&self) -> Syscall {
        self.call
    }

    /// Raw argument word `i` (0-based).
    pub fn word(&self, i: usize) -> u32 {
        debug_assert!(i < self.arity, "argument {} of {:?} not decoded", i, self.call);
        self.words[i]
    }

    /// Argument `i` as a signed integer.
    pub fn int(&self, i: usize) -> i32 {
        self.word(i) as i32
    }

    /// Argument `i` as a user pointer.
    pub fn ptr(&self, i: usize) -> VirtAddr {
        VirtAddr::new(self.word(i))
    }
}

/// Dispatch a system call
///
/// # Arguments
/// * `kernel` - The kernel the caller runs on
/// * `pid` - The calling process
/// * `frame` - Trap frame; `esp` points at the opcode word
///
/// # Returns
/// `Ok(())` if the caller keeps running (its result, if any, is in
/// `frame.eax`), otherwise why it stopped.
///
/// # Security
/// - Any fault terminates the caller with -1; nothing is returned to it
/// - Faults are detected before the handler has any side effect
pub fn dispatch(kernel: &Arc<Kernel>, pid: Pid, frame: &mut TrapFrame) -> Result<(), Stopped> {
    let esp = VirtAddr::new(frame.esp);
    let result = kernel
        .with_user_space(pid, |space| SyscallArgs::decode(space, esp))
        .map_err(Trap::from)
        .and_then(|(entry, args)| {
            log::trace!("[SYSCALL] pid {} {:?}{:?}", pid, args.call, &args.words[..args.arity]);
            (entry.handler)(kernel, pid, &args)
        });

    match result {
        Ok(Some(value)) => {
            frame.eax = value;
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(Trap::Fault(fault)) => {
            log::warn!("[SYSCALL] pid {}: {}, terminating", pid, fault);
            kernel.terminate(pid, -1);
            Err(Stopped::Exited(-1))
        }
        Err(Trap::Exit(status)) => {
            kernel.terminate(pid, status);
            Err(Stopped::Exited(status))
        }
        Err(Trap::Halt) => {
            kernel.halt();
            Err(Stopped::Halted)
        }
    }
}

/// Sign-reinterpret an ABI integer for `eax`.
fn ret(value: i32) -> SyscallResult {
    Ok(Some(value as u32))
}

/// Copy a NUL-terminated user string argument into the kernel.
fn user_string(kernel: &Kernel, pid: Pid, ptr: VirtAddr) -> Result<alloc::string::String, Fault> {
    let limit = kernel.config().max_user_string;
    kernel.with_user_space(pid, |space| validate::read_user_string(space, ptr, limit))
}

fn sys_halt(_kernel: &Arc<Kernel>, pid: Pid, _args: &SyscallArgs) -> SyscallResult {
    log::debug!("[SYSCALL] pid {} halt", pid);
    Err(Trap::Halt)
}

fn sys_exit(_kernel: &Arc<Kernel>, _pid: Pid, args: &SyscallArgs) -> SyscallResult {
    Err(Trap::Exit(args.int(0)))
}

/// Exec system call
///
/// # Returns
/// The new pid, or -1 if the program could not be launched
fn sys_exec(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    let command_line = user_string(kernel, pid, args.ptr(0))?;
    match kernel.launch(pid, &command_line) {
        Ok(child) => ret(child.as_raw()),
        Err(err) => {
            log::debug!("[SYSCALL] pid {} exec {:?}: {}", pid, command_line, err);
            ret(-1)
        }
    }
}

fn sys_wait(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    ret(kernel.wait(pid, Pid::from_raw(args.int(0))))
}

fn sys_create(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    let name = user_string(kernel, pid, args.ptr(0))?;
    let created = kernel.platform().files.create(pid, &name, args.word(1));
    Ok(Some(u32::from(created)))
}

fn sys_remove(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    let name = user_string(kernel, pid, args.ptr(0))?;
    let removed = kernel.platform().files.remove(pid, &name);
    Ok(Some(u32::from(removed)))
}

fn sys_open(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    let name = user_string(kernel, pid, args.ptr(0))?;
    ret(kernel.platform().files.open(pid, &name))
}

fn sys_filesize(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    ret(kernel.platform().files.filesize(pid, args.int(0)))
}

/// Read system call
///
/// # Arguments
/// * `fd` - Only 0 (console input) is served
/// * `buffer` - User destination, validated writable over its whole span
/// * `size` - Number of bytes to read
///
/// # Returns
/// `size` after consuming exactly `size` console bytes, -1 for any other fd
fn sys_read(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    let fd = args.int(0);
    if fd != STDIN_FILENO {
        log::debug!("[SYSCALL] pid {} read: unsupported fd {}", pid, fd);
        return ret(-1);
    }

    let (buffer, size) = (args.ptr(1), args.word(2));
    let dest = kernel.with_user_space(pid, |space| validate::validate_user_write(space, buffer, size))?;

    let console = &kernel.platform().console;
    let data: Vec<u8> = (0..dest.len()).map(|_| console.read_byte()).collect();

    kernel.with_user_space(pid, |space| dest.copy_out(space, &data))?;
    Ok(Some(size))
}

/// Write system call
///
/// # Arguments
/// * `fd` - Only 1 (console output) is served
/// * `buffer` - User source, validated over its whole span
/// * `size` - Number of bytes to write
///
/// # Returns
/// `size`, or -1 for any other fd (the buffer is not touched)
fn sys_write(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    let fd = args.int(0);
    if fd != STDOUT_FILENO {
        log::debug!("[SYSCALL] pid {} write: unsupported fd {}", pid, fd);
        return ret(-1);
    }

    let (buffer, size) = (args.ptr(1), args.word(2));
    let data = kernel.with_user_space(pid, |space| {
        validate::validate_user_read(space, buffer, size)?.copy_in(space)
    })?;

    console::write_chunked(&*kernel.platform().console, &data, kernel.config().console_chunk);
    Ok(Some(size))
}

fn sys_seek(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    kernel.platform().files.seek(pid, args.int(0), args.word(1));
    Ok(None)
}

fn sys_tell(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    Ok(Some(kernel.platform().files.tell(pid, args.int(0))))
}

fn sys_close(kernel: &Arc<Kernel>, pid: Pid, args: &SyscallArgs) -> SyscallResult {
    kernel.platform().files.close(pid, args.int(0));
    Ok(None)
}

fn sys_fibonacci(_kernel: &Arc<Kernel>, _pid: Pid, args: &SyscallArgs) -> SyscallResult {
    ret(fibonacci(args.int(0)))
}

fn sys_max_of_four_int(_kernel: &Arc<Kernel>, _pid: Pid, args: &SyscallArgs) -> SyscallResult {
    ret(max_of_four_int(args.int(0), args.int(1), args.int(2), args.int(3)))
}

/// n-th Fibonacci number, `fib(0) = 0`, `fib(1) = 1`.
///
/// `n <= 1` is returned as is, so negative `n` gives `n`. Results past
/// `fib(46)` wrap in 32 bits.
pub fn fibonacci(n: i32) -> i32 {
    if n <= 1 {
        return n;
    }
    let (mut a, mut b) = (0i32, 1i32);
    for _ in 0..n {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    a
}

pub fn max_of_four_int(a: i32, b: i32, c: i32, d: i32) -> i32 {
    a.max(b).max(c).max(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosted::testing::{boot, boot_with};
    use crate::hosted::{CaptureConsole, Host};
    use crate::kernel::KernelConfig;
    use crate::loader::ProgramTable;
    use crate::mm::{CODE_BASE, PHYS_BASE};
    use crate::platform::{FileSystem, NullFileSystem};
    use crate::user::Syscalls;
    use std::string::String;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Run `program` as the only registered program.
    fn run_alone<F>(program: F) -> (i32, Host, Arc<CaptureConsole>)
    where
        F: Fn(&mut Syscalls<'_>) -> Result<i32, Stopped> + Send + Sync + 'static,
    {
        let programs = ProgramTable::new();
        programs.register("prog", program);
        let (host, console) = boot(programs);
        let status = host.kernel.run("prog");
        host.shutdown();
        (status, host, console)
    }

    #[test]
    fn test_table_is_consistent() {
        for entry in SYSCALL_TABLE.iter() {
            assert!(entry.arity <= MAX_ARGS);
            assert_eq!(Syscall::from_raw(entry.call.number()), Some(entry.call));
        }
        assert_eq!(Syscall::Read.arity(), 3);
        assert_eq!(Syscall::MaxOfFourInt.arity(), 4);
        assert_eq!(Syscall::Halt.arity(), 0);
    }

    #[test]
    fn test_unknown_opcodes() {
        for nr in [13, 19, 22, 0xFFFF_FFFF] {
            assert_eq!(Syscall::from_raw(nr), None);
        }
    }

    #[test]
    fn test_fibonacci() {
        assert_eq!(fibonacci(0), 0);
        assert_eq!(fibonacci(1), 1);
        assert_eq!(fibonacci(2), 1);
        assert_eq!(fibonacci(10), 55);
        assert_eq!(fibonacci(46), 1_836_311_903);
        assert_eq!(fibonacci(-1), -1);
        assert_eq!(fibonacci(-4), -4);
    }

    #[test]
    fn test_max_of_four() {
        assert_eq!(max_of_four_int(3, 7, 2, 9), 9);
        assert_eq!(max_of_four_int(-1, -5, -2, -9), -1);
        assert_eq!(max_of_four_int(i32::MIN, 0, i32::MAX, 5), i32::MAX);
    }

    #[test]
    fn test_write_is_one_console_write() {
        let (status, _host, console) = run_alone(|sys: &mut Syscalls<'_>| sys.write(1, &[b'a'; 300]));
        assert_eq!(status, 300);
        let writes = console.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], vec![b'a'; 300]);
        assert_eq!(writes[1], b"prog: exit(300)\n".to_vec());
    }

    #[test]
    fn test_large_write_is_chunked() {
        let programs = ProgramTable::new();
        programs.register("prog", |sys: &mut Syscalls<'_>| sys.write(1, &[b'z'; 1200]));
        let console = Arc::new(CaptureConsole::new());
        let host = boot_with(programs, Arc::clone(&console), KernelConfig::default());

        assert_eq!(host.kernel.run("prog"), 1200);
        host.shutdown();
        let sizes: Vec<usize> = console.writes().iter().map(Vec::len).collect();
        assert_eq!(sizes[..3], [512, 512, 176]);
    }

    #[test]
    fn test_write_to_other_fd() {
        let (status, _host, console) = run_alone(|sys: &mut Syscalls<'_>| {
            let buffered = sys.write(5, b"hello")?;
            // The buffer of a rejected descriptor is never looked at.
            let null = sys.write_at(2, VirtAddr::NULL, 10)?;
            Ok(i32::from(buffered != -1 || null != -1))
        });
        assert_eq!(status, 0);
        assert_eq!(console.output(), "prog: exit(0)\n");
    }

    #[test]
    fn test_write_from_bad_buffers_kills() {
        for buffer in [0, PHYS_BASE - 2, PHYS_BASE, 0x1000_0000, u32::MAX - 1] {
            let (status, host, console) = run_alone(move |sys: &mut Syscalls<'_>| {
                sys.write_at(1, VirtAddr::new(buffer), 4)?;
                Ok(0)
            });
            assert_eq!(status, -1, "buffer {:#x}", buffer);
            assert_eq!(console.output(), "prog: exit(-1)\n", "buffer {:#x}", buffer);
            assert_eq!(host.kernel.free_frames(), host.kernel.config().frame_count);
        }
    }

    #[test]
    fn test_zero_length_write() {
        let (status, _host, console) = run_alone(|sys: &mut Syscalls<'_>| sys.write_at(1, VirtAddr::NULL, 0));
        assert_eq!(status, 0);
        assert_eq!(console.writes().len(), 1);
    }

    #[test]
    fn test_read_console() {
        let programs = ProgramTable::new();
        programs.register("prog", |sys: &mut Syscalls<'_>| {
            let mut buf = [0u8; 4];
            let n = sys.read(0, &mut buf)?;
            sys.write(1, &buf)?;
            Ok(n)
        });
        let console = Arc::new(CaptureConsole::with_input(b"abcdef"));
        let host = boot_with(programs, Arc::clone(&console), KernelConfig::default());

        assert_eq!(host.kernel.run("prog"), 4);
        host.shutdown();
        assert_eq!(console.output(), "abcdprog: exit(4)\n");
        assert_eq!(console.pending_input(), 2);
    }

    #[test]
    fn test_read_from_other_fd() {
        let programs = ProgramTable::new();
        programs.register("prog", |sys: &mut Syscalls<'_>| {
            let mut buf = [0u8; 4];
            sys.read(3, &mut buf)
        });
        let console = Arc::new(CaptureConsole::with_input(b"xy"));
        let host = boot_with(programs, Arc::clone(&console), KernelConfig::default());

        assert_eq!(host.kernel.run("prog"), -1);
        host.shutdown();
        assert_eq!(console.pending_input(), 2);
        assert_eq!(console.output(), "prog: exit(-1)\n");
    }

    #[test]
    fn test_read_into_code_page_kills() {
        let programs = ProgramTable::new();
        programs.register("prog", |sys: &mut Syscalls<'_>| {
            sys.read_at(0, VirtAddr::new(CODE_BASE), 4)?;
            Ok(0)
        });
        let console = Arc::new(CaptureConsole::with_input(b"1234"));
        let host = boot_with(programs, Arc::clone(&console), KernelConfig::default());

        assert_eq!(host.kernel.run("prog"), -1);
        host.shutdown();
        // Nothing consumed: validation happens before the first byte is read.
        assert_eq!(console.pending_input(), 4);
    }

    #[test]
    fn test_unknown_syscall_kills() {
        for nr in [13, 19, 22, 1000] {
            let (status, _host, console) = run_alone(move |sys: &mut Syscalls<'_>| {
                sys.syscall_raw(nr, &[])?;
                Ok(0)
            });
            assert_eq!(status, -1, "opcode {}", nr);
            assert_eq!(console.output(), "prog: exit(-1)\n");
        }
    }

    #[test]
    fn test_bad_stack_pointer_kills() {
        for esp in [0, 2, PHYS_BASE, PHYS_BASE - 2, 0x1000_0000, u32::MAX] {
            let (status, _host, console) = run_alone(move |sys: &mut Syscalls<'_>| {
                sys.trap_at(VirtAddr::new(esp))?;
                Ok(0)
            });
            assert_eq!(status, -1, "esp {:#x}", esp);
            assert_eq!(console.output(), "prog: exit(-1)\n");
        }
    }

    #[test]
    fn test_argument_slot_in_kernel_kills() {
        let (status, _host, console) = run_alone(|sys: &mut Syscalls<'_>| {
            let esp = VirtAddr::new(PHYS_BASE - 4);
            sys.store(esp, &Syscall::Write.number().to_le_bytes())?;
            sys.trap_at(esp)?;
            Ok(0)
        });
        assert_eq!(status, -1);
        assert_eq!(console.output(), "prog: exit(-1)\n");
    }

    #[test]
    fn test_zero_arity_call_at_stack_top() {
        let (status, host, _console) = run_alone(|sys: &mut Syscalls<'_>| {
            let esp = VirtAddr::new(PHYS_BASE - 4);
            sys.store(esp, &Syscall::Halt.number().to_le_bytes())?;
            sys.trap_at(esp)?;
            Ok(0)
        });
        assert_eq!(status, -1);
        assert!(host.power.is_off());
    }

    #[test]
    fn test_exec_with_bad_strings_kills() {
        let (status, _host, _console) = run_alone(|sys: &mut Syscalls<'_>| {
            sys.syscall_raw(Syscall::Exec.number(), &[PHYS_BASE])?;
            Ok(0)
        });
        assert_eq!(status, -1);

        // A string that runs into the kernel region without a NUL.
        let (status, _host, console) = run_alone(|sys: &mut Syscalls<'_>| {
            let at = VirtAddr::new(PHYS_BASE - 4);
            sys.store(at, b"abcd")?;
            sys.syscall_raw(Syscall::Exec.number(), &[at.as_u32()])?;
            Ok(0)
        });
        assert_eq!(status, -1);
        assert_eq!(console.output(), "prog: exit(-1)\n");
    }

    #[test]
    fn test_arithmetic_calls() {
        let (status, _host, _console) = run_alone(|sys: &mut Syscalls<'_>| {
            let results = [
                sys.fibonacci(0)?,
                sys.fibonacci(1)?,
                sys.fibonacci(10)?,
                sys.max_of_four_int(3, 7, 2, 9)?,
                sys.max_of_four_int(-1, -5, -2, -9)?,
            ];
            Ok(i32::from(results != [0, 1, 55, 9, -1]))
        });
        assert_eq!(status, 0);
    }

    #[test]
    fn test_null_file_system() {
        let (status, _host, _console) = run_alone(|sys: &mut Syscalls<'_>| {
            let ok = sys.create("file", 10)?
                && sys.remove("file")?
                && sys.open("file")? == -1
                && sys.filesize(3)? == 0
                && sys.tell(3)? == 0;
            sys.seek(3, 5)?;
            sys.close(3)?;
            Ok(i32::from(!ok))
        });
        assert_eq!(status, 0);
    }

    #[derive(Default)]
    struct RecordingFs {
        calls: Mutex<Vec<String>>,
        released: Mutex<Vec<Pid>>,
    }

    impl RecordingFs {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl FileSystem for RecordingFs {
        fn create(&self, pid: Pid, name: &str, initial_size: u32) -> bool {
            self.record(format!("{} create {} {}", pid, name, initial_size));
            false
        }
        fn remove(&self, pid: Pid, name: &str) -> bool {
            self.record(format!("{} remove {}", pid, name));
            false
        }
        fn open(&self, pid: Pid, name: &str) -> i32 {
            self.record(format!("{} open {}", pid, name));
            7
        }
        fn filesize(&self, pid: Pid, fd: i32) -> i32 {
            self.record(format!("{} filesize {}", pid, fd));
            123
        }
        fn seek(&self, pid: Pid, fd: i32, position: u32) {
            self.record(format!("{} seek {} {}", pid, fd, position));
        }
        fn tell(&self, pid: Pid, fd: i32) -> u32 {
            self.record(format!("{} tell {}", pid, fd));
            9
        }
        fn close(&self, pid: Pid, fd: i32) {
            self.record(format!("{} close {}", pid, fd));
        }
        fn release(&self, pid: Pid) {
            self.released.lock().unwrap().push(pid);
        }
    }

    #[test]
    fn test_file_calls_are_forwarded() {
        let programs = ProgramTable::new();
        programs.register("prog", |sys: &mut Syscalls<'_>| {
            let ok = !sys.create("a.txt", 64)?
                && !sys.remove("b.txt")?
                && sys.open("c.txt")? == 7
                && sys.filesize(7)? == 123
                && sys.tell(7)? == 9;
            sys.seek(7, 42)?;
            sys.close(7)?;
            Ok(i32::from(!ok))
        });
        let fs = Arc::new(RecordingFs::default());
        let console = Arc::new(CaptureConsole::new());
        let host = Host::boot(Arc::new(programs), console, fs.clone(), KernelConfig::default());

        assert_eq!(host.kernel.run("prog"), 0);
        host.shutdown();
        assert_eq!(
            *fs.calls.lock().unwrap(),
            vec![
                "2 create a.txt 64",
                "2 remove b.txt",
                "2 open c.txt",
                "2 filesize 7",
                "2 tell 7",
                "2 seek 7 42",
                "2 close 7",
            ]
        );
        assert_eq!(*fs.released.lock().unwrap(), vec![Pid::FIRST_USER]);
    }

    #[test]
    fn test_file_name_in_kernel_kills() {
        let programs = ProgramTable::new();
        programs.register("prog", |sys: &mut Syscalls<'_>| {
            sys.syscall_raw(Syscall::Open.number(), &[PHYS_BASE + 0x100])?;
            Ok(0)
        });
        let fs = Arc::new(RecordingFs::default());
        let host = Host::boot(
            Arc::new(programs),
            Arc::new(CaptureConsole::new()),
            fs.clone(),
            KernelConfig::default(),
        );

        assert_eq!(host.kernel.run("prog"), -1);
        host.shutdown();
        assert!(fs.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_halt_powers_off() {
        let (status, host, console) = run_alone(|sys: &mut Syscalls<'_>| Err(sys.halt()));
        assert_eq!(status, -1);
        assert!(host.power.is_off());
        assert!(host.kernel.is_halted());
        assert_eq!(console.output(), "");
        assert_eq!(host.kernel.process_count(), 0);
    }

    #[test]
    fn test_halt_stops_other_processes() {
        let stopped = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&stopped);

        let programs = ProgramTable::new();
        programs.register("halter", |sys: &mut Syscalls<'_>| Err(sys.halt()));
        programs.register("parent", move |sys: &mut Syscalls<'_>| {
            let child = sys.exec("halter")?;
            let status = sys.wait(child)?;
            let after = sys.write(1, b"still here\n");
            seen.store(after == Err(Stopped::Halted), Ordering::SeqCst);
            after?;
            Ok(status)
        });
        let (host, console) = boot(programs);

        assert_eq!(host.kernel.run("parent"), -1);
        host.shutdown();
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(console.output(), "");
        assert_eq!(host.kernel.process_count(), 0);
    }

    #[test]
    fn test_killed_child_reports_minus_one() {
        let programs = ProgramTable::new();
        programs.register("crasher", |sys: &mut Syscalls<'_>| {
            sys.write_at(1, VirtAddr::NULL, 1)?;
            Ok(0)
        });
        programs.register("parent", |sys: &mut Syscalls<'_>| {
            let child = sys.exec("crasher")?;
            sys.wait(child)
        });
        let (host, console) = boot(programs);

        assert_eq!(host.kernel.run("parent"), -1);
        host.shutdown();
        assert_eq!(console.output(), "crasher: exit(-1)\nparent: exit(-1)\n");
    }

    #[test]
    fn test_null_file_system_is_default_stub() {
        let fs = NullFileSystem;
        assert!(fs.create(Pid::INIT, "x", 0));
        assert_eq!(fs.open(Pid::INIT, "x"), -1);
    }
}

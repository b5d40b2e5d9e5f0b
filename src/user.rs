//! User mode
//!
//! A [`Program`] runs as the body of a process and reaches the kernel only
//! through [`Syscalls`]: loads and stores go through its address space,
//! system calls push an opcode frame onto its stack and trap.
//!
//! Every method returns `Err(Stopped)` once the process no longer runs;
//! propagating it with `?` is how a program unwinds after being killed.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::kernel::Kernel;
use crate::mm::{VirtAddr, WORD_SIZE};
use crate::process::Pid;
use crate::syscall::{Access, Fault, Syscall};
use crate::trap::{Stopped, TrapCause, TrapFrame};

/// A user program's entry point.
///
/// Returning `Ok(status)` exits with `status`.
pub trait Program: Send + Sync {
    fn main(&self, sys: &mut Syscalls<'_>) -> Result<i32, Stopped>;
}

impl<F> Program for F
where
    F: Fn(&mut Syscalls<'_>) -> Result<i32, Stopped> + Send + Sync,
{
    fn main(&self, sys: &mut Syscalls<'_>) -> Result<i32, Stopped> {
        self(sys)
    }
}

/// Address a fault is reported at.
fn fault_address(fault: Fault, fallback: VirtAddr) -> VirtAddr {
    match fault {
        Fault::NullPointer => VirtAddr::NULL,
        Fault::KernelAddress(addr)
        | Fault::Unmapped(addr)
        | Fault::ReadOnly(addr)
        | Fault::UnterminatedString(addr) => addr,
        Fault::Overflow | Fault::UnknownSyscall(_) => fallback,
    }
}

/// The user side of the trap ABI for one process.
pub struct Syscalls<'k> {
    kernel: &'k Arc<Kernel>,
    pid: Pid,
    esp: VirtAddr,
    entry_esp: VirtAddr,
}

impl<'k> Syscalls<'k> {
    pub(crate) fn new(kernel: &'k Arc<Kernel>, pid: Pid, esp: VirtAddr) -> Self {
        Self {
            kernel,
            pid,
            esp,
            entry_esp: esp,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Current user stack pointer.
    pub fn esp(&self) -> VirtAddr {
        self.esp
    }

    fn page_fault(&mut self, addr: VirtAddr, access: Access) -> Stopped {
        let mut frame = TrapFrame::new(self.esp.as_u32());
        match self.kernel.trap(self.pid, TrapCause::PageFault { addr, access }, &mut frame) {
            Err(stopped) => stopped,
            Ok(()) => Stopped::Exited(-1),
        }
    }

    // ---- Memory ----

    /// Load `len` bytes from user memory.
    pub fn load(&mut self, addr: VirtAddr, len: usize) -> Result<Vec<u8>, Stopped> {
        self.kernel
            .user_load(self.pid, addr, len)
            .map_err(|fault| self.page_fault(fault_address(fault, addr), Access::Read))
    }

    /// Store `data` into user memory.
    pub fn store(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), Stopped> {
        self.kernel
            .user_store(self.pid, addr, data)
            .map_err(|fault| self.page_fault(fault_address(fault, addr), Access::Write))
    }

    pub fn load_word(&mut self, addr: VirtAddr) -> Result<u32, Stopped> {
        let bytes = self.load(addr, WORD_SIZE as usize)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Load a NUL-terminated string.
    pub fn load_cstr(&mut self, addr: VirtAddr) -> Result<String, Stopped> {
        let mut bytes = Vec::new();
        let mut at = addr;
        loop {
            let byte = self.load(at, 1)?[0];
            if byte == 0 {
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte);
            at = match at.checked_add(1) {
                Some(next) => next,
                None => return Err(self.page_fault(at, Access::Read)),
            };
        }
    }

    /// Push `data` onto the user stack, word aligned. Returns its address.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<VirtAddr, Stopped> {
        let size = u32::try_from(data.len().next_multiple_of(WORD_SIZE as usize)).ok();
        let Some(top) = size.and_then(|size| self.esp.checked_sub(size)) else {
            return Err(self.page_fault(VirtAddr::NULL, Access::Write));
        };
        self.esp = top;
        self.store(top, data)?;
        Ok(top)
    }

    /// Push `s` with its NUL terminator.
    pub fn push_str(&mut self, s: &str) -> Result<VirtAddr, Stopped> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.push_bytes(&bytes)
    }

    /// Run `f`, then pop whatever it pushed.
    fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R, Stopped>) -> Result<R, Stopped> {
        let saved = self.esp;
        let result = f(self);
        self.esp = saved;
        result
    }

    /// The argument vector the loader left on the initial stack.
    pub fn argv(&mut self) -> Result<Vec<String>, Stopped> {
        let base = self.entry_esp.as_u32();
        let argc = self.load_word(VirtAddr::new(base.wrapping_add(WORD_SIZE)))?;
        let argv = self.load_word(VirtAddr::new(base.wrapping_add(2 * WORD_SIZE)))?;

        let mut args = Vec::new();
        for i in 0..argc {
            let slot = VirtAddr::new(argv.wrapping_add(i.wrapping_mul(WORD_SIZE)));
            let ptr = self.load_word(slot)?;
            args.push(self.load_cstr(VirtAddr::new(ptr))?);
        }
        Ok(args)
    }

    // ---- Traps ----

    /// Trap with the frame at `esp`, whatever is there. Returns `eax`.
    pub fn trap_at(&mut self, esp: VirtAddr) -> Result<u32, Stopped> {
        let mut frame = TrapFrame::new(esp.as_u32());
        self.kernel.trap(self.pid, TrapCause::Syscall, &mut frame)?;
        Ok(frame.eax)
    }

    /// Push `nr` and `args` as a frame and trap. Returns `eax`.
    pub fn syscall_raw(&mut self, nr: u32, args: &[u32]) -> Result<u32, Stopped> {
        self.scoped(|sys| {
            let mut frame = Vec::with_capacity((args.len() + 1) * WORD_SIZE as usize);
            frame.extend(nr.to_le_bytes());
            for arg in args {
                frame.extend(arg.to_le_bytes());
            }
            let esp = sys.push_bytes(&frame)?;
            sys.trap_at(esp)
        })
    }

    fn call(&mut self, call: Syscall, args: &[u32]) -> Result<u32, Stopped> {
        self.syscall_raw(call.number(), args)
    }

    // ---- System calls ----

    pub fn halt(&mut self) -> Stopped {
        match self.call(Syscall::Halt, &[]) {
            Err(stopped) => stopped,
            Ok(_) => Stopped::Halted,
        }
    }

    pub fn exit(&mut self, status: i32) -> Stopped {
        match self.call(Syscall::Exit, &[status as u32]) {
            Err(stopped) => stopped,
            Ok(_) => Stopped::Exited(status),
        }
    }

    /// Launch `command_line`. Returns the child's pid or -1.
    pub fn exec(&mut self, command_line: &str) -> Result<i32, Stopped> {
        self.scoped(|sys| {
            let ptr = sys.push_str(command_line)?;
            sys.call(Syscall::Exec, &[ptr.as_u32()]).map(|v| v as i32)
        })
    }

    /// Wait for child `pid`. Returns its exit status or -1.
    pub fn wait(&mut self, pid: i32) -> Result<i32, Stopped> {
        self.call(Syscall::Wait, &[pid as u32]).map(|v| v as i32)
    }

    pub fn create(&mut self, name: &str, initial_size: u32) -> Result<bool, Stopped> {
        self.scoped(|sys| {
            let ptr = sys.push_str(name)?;
            sys.call(Syscall::Create, &[ptr.as_u32(), initial_size]).map(|v| v != 0)
        })
    }

    pub fn remove(&mut self, name: &str) -> Result<bool, Stopped> {
        self.scoped(|sys| {
            let ptr = sys.push_str(name)?;
            sys.call(Syscall::Remove, &[ptr.as_u32()]).map(|v| v != 0)
        })
    }

    pub fn open(&mut self, name: &str) -> Result<i32, Stopped> {
        self.scoped(|sys| {
            let ptr = sys.push_str(name)?;
            sys.call(Syscall::Open, &[ptr.as_u32()]).map(|v| v as i32)
        })
    }

    pub fn filesize(&mut self, fd: i32) -> Result<i32, Stopped> {
        self.call(Syscall::Filesize, &[fd as u32]).map(|v| v as i32)
    }

    /// Read into `buf` through a buffer on the user stack.
    pub fn read(&mut self, fd: i32, buf: &mut [u8]) -> Result<i32, Stopped> {
        self.scoped(|sys| {
            let ptr = sys.push_bytes(&vec![0u8; buf.len()])?;
            let n = sys.read_at(fd, ptr, buf.len() as u32)?;
            if n > 0 {
                let n = (n as usize).min(buf.len());
                buf[..n].copy_from_slice(&sys.load(ptr, n)?);
            }
            Ok(n)
        })
    }

    /// `read` with a caller-chosen buffer address.
    pub fn read_at(&mut self, fd: i32, buffer: VirtAddr, size: u32) -> Result<i32, Stopped> {
        self.call(Syscall::Read, &[fd as u32, buffer.as_u32(), size])
            .map(|v| v as i32)
    }

    /// Write `data` through a buffer on the user stack.
    pub fn write(&mut self, fd: i32, data: &[u8]) -> Result<i32, Stopped> {
        self.scoped(|sys| {
            let ptr = sys.push_bytes(data)?;
            sys.write_at(fd, ptr, data.len() as u32)
        })
    }

    /// `write` with a caller-chosen buffer address.
    pub fn write_at(&mut self, fd: i32, buffer: VirtAddr, size: u32) -> Result<i32, Stopped> {
        self.call(Syscall::Write, &[fd as u32, buffer.as_u32(), size])
            .map(|v| v as i32)
    }

    pub fn seek(&mut self, fd: i32, position: u32) -> Result<(), Stopped> {
        self.call(Syscall::Seek, &[fd as u32, position]).map(|_| ())
    }

    pub fn tell(&mut self, fd: i32) -> Result<u32, Stopped> {
        self.call(Syscall::Tell, &[fd as u32])
    }

    pub fn close(&mut self, fd: i32) -> Result<(), Stopped> {
        self.call(Syscall::Close, &[fd as u32]).map(|_| ())
    }

    pub fn fibonacci(&mut self, n: i32) -> Result<i32, Stopped> {
        self.call(Syscall::Fibonacci, &[n as u32]).map(|v| v as i32)
    }

    pub fn max_of_four_int(&mut self, a: i32, b: i32, c: i32, d: i32) -> Result<i32, Stopped> {
        self.call(Syscall::MaxOfFourInt, &[a as u32, b as u32, c as u32, d as u32])
            .map(|v| v as i32)
    }
}

//! System Call Input Validation
//!
//! Every address a user program hands to the kernel goes through here
//! before anything is read from or written to it.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: deny by default
//! - Validate the whole span, not the first byte: a buffer that starts on a
//!   mapped page and runs off its end is rejected
//! - Copy through kernel-owned buffers (no TOCTOU on user memory)
//!
//! A failed check is a [`Fault`]. Faults are never returned to the user
//! program; the dispatcher turns them into termination with status -1.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::mm::address::{PAGE_SIZE, WORD_SIZE};
use crate::mm::{AddressSpace, PageFlags, VirtAddr, PHYS_BASE};

/// Why a user address was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Null pointer
    NullPointer,
    /// Address at or above `PHYS_BASE`
    KernelAddress(VirtAddr),
    /// No user mapping for the page
    Unmapped(VirtAddr),
    /// Store into a page without `WRITABLE`
    ReadOnly(VirtAddr),
    /// Span wraps past the top of the address space
    Overflow,
    /// No NUL within the string length limit
    UnterminatedString(VirtAddr),
    /// Opcode with no table entry
    UnknownSyscall(u32),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullPointer => write!(f, "null pointer"),
            Self::KernelAddress(addr) => write!(f, "kernel address {}", addr),
            Self::Unmapped(addr) => write!(f, "unmapped address {}", addr),
            Self::ReadOnly(addr) => write!(f, "write to read-only page at {}", addr),
            Self::Overflow => write!(f, "address range overflow"),
            Self::UnterminatedString(addr) => write!(f, "unterminated string at {}", addr),
            Self::UnknownSyscall(nr) => write!(f, "unknown system call {}", nr),
        }
    }
}

/// Kind of access being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// A (pointer, byte length) pair. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpan {
    start: VirtAddr,
    len: u32,
}

impl AddressSpan {
    /// Build a span, rejecting one that wraps the 32-bit address space.
    pub fn new(start: VirtAddr, len: u32) -> Result<Self, Fault> {
        if len > 0 {
            start.checked_add(len - 1).ok_or(Fault::Overflow)?;
        }
        Ok(Self { start, len })
    }

    #[inline]
    pub fn start(&self) -> VirtAddr {
        self.start
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Last byte of the span. Only meaningful for non-empty spans.
    fn last(&self) -> VirtAddr {
        VirtAddr::new(self.start.as_u32() + (self.len - 1))
    }

    /// Base address of every page the span touches.
    fn pages(&self) -> impl Iterator<Item = VirtAddr> {
        let first = self.start.align_down().as_usize();
        let last = if self.is_empty() { first } else { self.last().align_down().as_usize() };
        let count = if self.is_empty() { 0 } else { (last - first) / PAGE_SIZE + 1 };
        (0..count).map(move |i| VirtAddr::new((first + i * PAGE_SIZE) as u32))
    }
}

/// Check that every byte of `span` may be accessed by user code.
///
/// # Security Checks
/// 1. Span is non-null
/// 2. Span lies strictly below `PHYS_BASE`
/// 3. Every page it touches is mapped for user access
/// 4. For stores, every page is writable
pub fn check_span(space: &AddressSpace, span: AddressSpan, access: Access) -> Result<(), Fault> {
    // Zero-length spans are valid
    if span.is_empty() {
        return Ok(());
    }

    if span.start().is_null() {
        return Err(Fault::NullPointer);
    }

    if span.last().is_kernel() {
        let first_kernel = span.start().max(VirtAddr::new(PHYS_BASE));
        return Err(Fault::KernelAddress(first_kernel));
    }

    for page in span.pages() {
        let at = page.max(span.start());
        let flags = space.translate(page).ok_or(Fault::Unmapped(at))?;
        if !flags.contains(PageFlags::USER) {
            return Err(Fault::Unmapped(at));
        }
        if access == Access::Write && !flags.contains(PageFlags::WRITABLE) {
            return Err(Fault::ReadOnly(at));
        }
    }

    Ok(())
}

/// Check `len` bytes at `addr` for a user-mode load or store.
pub fn check_user_access(
    space: &AddressSpace,
    addr: VirtAddr,
    len: usize,
    access: Access,
) -> Result<(), Fault> {
    let len = u32::try_from(len).map_err(|_| Fault::Overflow)?;
    check_span(space, AddressSpan::new(addr, len)?, access)
}

/// Validate the opcode word at `esp` and the `count` argument words above it.
///
/// Slot `i` is the 4-byte word at `esp + 4 * i`; slot 0 is the opcode.
pub fn validate_frame(space: &AddressSpace, esp: VirtAddr, count: usize) -> Result<(), Fault> {
    for slot in 0..=count {
        let offset = u32::try_from(slot).map_err(|_| Fault::Overflow)? * WORD_SIZE;
        let addr = esp.checked_add(offset).ok_or(Fault::Overflow)?;
        check_span(space, AddressSpan::new(addr, WORD_SIZE)?, Access::Read)?;
    }
    Ok(())
}

/// Read a word that [`validate_frame`] has already accepted.
pub(crate) fn read_word(space: &AddressSpace, addr: VirtAddr) -> Result<u32, Fault> {
    let mut bytes = [0u8; 4];
    space.read(addr, &mut bytes).map_err(|_| Fault::Unmapped(addr))?;
    Ok(u32::from_le_bytes(bytes))
}

/// A validated user-space source buffer.
///
/// Only [`validate_user_read`] constructs one.
#[derive(Debug)]
pub struct UserBuffer {
    span: AddressSpan,
}

impl UserBuffer {
    pub fn len(&self) -> usize {
        self.span.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    /// Copy the buffer into kernel memory.
    pub fn copy_in(&self, space: &AddressSpace) -> Result<Vec<u8>, Fault> {
        let mut data = vec![0u8; self.len()];
        space
            .read(self.span.start(), &mut data)
            .map_err(|_| Fault::Unmapped(self.span.start()))?;
        Ok(data)
    }
}

/// A validated user-space destination buffer.
///
/// Only [`validate_user_write`] constructs one.
#[derive(Debug)]
pub struct UserBufferMut {
    span: AddressSpan,
}

impl UserBufferMut {
    pub fn len(&self) -> usize {
        self.span.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    /// Copy `data` out to the start of the buffer.
    pub fn copy_out(&self, space: &mut AddressSpace, data: &[u8]) -> Result<(), Fault> {
        if data.len() > self.len() {
            return Err(Fault::Overflow);
        }
        space
            .write(self.span.start(), data)
            .map_err(|_| Fault::Unmapped(self.span.start()))
    }
}

/// Validate a user-space read buffer
///
/// # Returns
/// * `Ok(UserBuffer)` - Validated buffer handle
/// * `Err(Fault)` - Validation failed
pub fn validate_user_read(space: &AddressSpace, ptr: VirtAddr, len: u32) -> Result<UserBuffer, Fault> {
    let span = AddressSpan::new(ptr, len)?;
    check_span(space, span, Access::Read)?;
    Ok(UserBuffer { span })
}

/// Validate a user-space write buffer
///
/// Same as read validation, plus every page must be writable.
pub fn validate_user_write(
    space: &AddressSpace,
    ptr: VirtAddr,
    len: u32,
) -> Result<UserBufferMut, Fault> {
    let span = AddressSpan::new(ptr, len)?;
    check_span(space, span, Access::Write)?;
    Ok(UserBufferMut { span })
}

/// Copy a NUL-terminated user string into the kernel.
///
/// Each byte's page is validated before the byte is read. Invalid UTF-8 is
/// replaced, not rejected: names are opaque to this layer.
pub fn read_user_string(space: &AddressSpace, ptr: VirtAddr, max_len: usize) -> Result<String, Fault> {
    let mut bytes = Vec::new();
    for i in 0..max_len {
        let offset = u32::try_from(i).map_err(|_| Fault::Overflow)?;
        let addr = ptr.checked_add(offset).ok_or(Fault::Overflow)?;
        check_span(space, AddressSpan::new(addr, 1)?, Access::Read)?;

        let mut byte = [0u8; 1];
        space.read(addr, &mut byte).map_err(|_| Fault::Unmapped(addr))?;
        if byte[0] == 0 {
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.push(byte[0]);
    }
    Err(Fault::UnterminatedString(ptr))
}

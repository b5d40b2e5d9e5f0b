//! User Virtual Address Types
//!
//! Type-safe wrapper for the 32-bit addresses that cross the trap boundary,
//! plus the memory-map constants shared by the loader and the validator.
//!
//! # Layout
//! ```text
//! 0xFFFF_FFFF ┌──────────────────────┐
//!             │  kernel (never user) │
//! 0xC000_0000 ├──────────────────────┤ PHYS_BASE
//!             │  user stack page     │
//!             │         ...          │
//! 0x0804_8000 │  user code page      │ CODE_BASE
//!             │         ...          │
//! 0x0000_0000 └──────────────────────┘ null page, never mapped
//! ```

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: usize = 12;

/// Size of one argument slot on the user stack.
pub const WORD_SIZE: u32 = 4;

/// First kernel address. Everything at or above it is off limits to user code.
pub const PHYS_BASE: u32 = 0xC000_0000;

/// Where the loader places a program's code page.
pub const CODE_BASE: u32 = 0x0804_8000;

/// Initial user stack pointer; the stack page sits just below it.
pub const USER_STACK_TOP: u32 = PHYS_BASE;

/// A user virtual address.
///
/// Nothing about a `VirtAddr` says it is safe to touch: it is whatever the
/// user program handed us. Only the validator turns it into something the
/// kernel reads through.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl VirtAddr {
    /// The null address.
    pub const NULL: Self = Self(0);

    /// Wrap a raw address.
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get the raw address as usize.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check if this is a kernel address (at or above `PHYS_BASE`).
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 >= PHYS_BASE
    }

    /// Check if this is a user address (strictly below `PHYS_BASE`).
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < PHYS_BASE
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.as_usize() & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !(PAGE_MASK as u32))
    }

    /// Virtual page number.
    #[inline]
    pub const fn page_number(self) -> usize {
        self.as_usize() >> PAGE_SHIFT
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.as_usize() & PAGE_MASK
    }

    /// Add an offset, or `None` if the result wraps past the top of the
    /// 32-bit address space.
    #[inline]
    pub const fn checked_add(self, offset: u32) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Subtract an offset, or `None` on underflow.
    #[inline]
    pub const fn checked_sub(self, offset: u32) -> Option<Self> {
        match self.0.checked_sub(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for VirtAddr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_kernel_boundary() {
        assert!(VirtAddr::new(PHYS_BASE - 1).is_user());
        assert!(VirtAddr::new(PHYS_BASE).is_kernel());
        assert!(!VirtAddr::new(PHYS_BASE).is_user());
        assert!(VirtAddr::NULL.is_null());
    }

    #[test]
    fn test_page_alignment() {
        let addr = VirtAddr::new(0x0804_9234);
        assert!(!addr.is_aligned());
        assert_eq!(addr.align_down().as_u32(), 0x0804_9000);
        assert_eq!(addr.page_offset(), 0x234);
        assert_eq!(addr.page_number(), 0x08049);
    }

    #[test]
    fn test_overflow() {
        assert!(VirtAddr::new(u32::MAX - 2).checked_add(4).is_none());
        assert!(VirtAddr::new(2).checked_sub(4).is_none());
    }
}

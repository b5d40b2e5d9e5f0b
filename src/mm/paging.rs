//! Per-Process Page Tables
//!
//! Each process owns one [`AddressSpace`]: a table from virtual page number
//! to an owned [`PhysFrame`] plus its [`PageFlags`]. Dropping the address
//! space drops every frame, which hands them back to the frame pool.
//!
//! The accessors here are kernel-mode: they only require the pages to be
//! present. Whether a *user* pointer may be used is the validator's call,
//! made before any of these are reached.
//!
//! # Security Properties
//! - Nothing can be mapped at or above `PHYS_BASE`
//! - Multi-page copies check every page before touching any byte

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::ops::Range;

use bitflags::bitflags;

use super::address::{VirtAddr, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
use super::frame::{FrameAllocator, PhysFrame};

bitflags! {
    /// Page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry maps a frame.
        const PRESENT = 1 << 0;
        /// User stores allowed.
        const WRITABLE = 1 << 1;
        /// Accessible from user mode.
        const USER = 1 << 2;

        /// User code: readable by user, not writable.
        const USER_CODE = Self::PRESENT.bits() | Self::USER.bits();
        /// User data and stack: readable and writable by user.
        const USER_DATA = Self::PRESENT.bits() | Self::USER.bits() | Self::WRITABLE.bits();
    }
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// The virtual address is already mapped.
    AlreadyMapped,
    /// The virtual address is not mapped.
    NotMapped,
    /// No physical frames available.
    OutOfMemory,
    /// The address is not properly aligned.
    MisalignedAddress,
    /// Attempted to map a kernel address into a user address space.
    InvalidPermissions,
    /// The range runs past the end of the address space.
    Overflow,
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyMapped => write!(f, "virtual address already mapped"),
            Self::NotMapped => write!(f, "virtual address not mapped"),
            Self::OutOfMemory => write!(f, "out of physical frames"),
            Self::MisalignedAddress => write!(f, "address not properly aligned"),
            Self::InvalidPermissions => write!(f, "kernel address in user mapping"),
            Self::Overflow => write!(f, "range wraps the address space"),
        }
    }
}

/// A single page table entry.
#[derive(Debug)]
struct PageTableEntry {
    frame: PhysFrame,
    flags: PageFlags,
}

/// A user address space.
pub struct AddressSpace {
    entries: BTreeMap<usize, PageTableEntry>,
    frames: Arc<FrameAllocator>,
}

impl AddressSpace {
    /// Create an empty address space backed by `frames`.
    pub fn new(frames: Arc<FrameAllocator>) -> Self {
        Self {
            entries: BTreeMap::new(),
            frames,
        }
    }

    /// Map a fresh zeroed frame at `virt`.
    pub fn map_page(&mut self, virt: VirtAddr, flags: PageFlags) -> Result<(), MappingError> {
        if !virt.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        if virt.is_kernel() {
            return Err(MappingError::InvalidPermissions);
        }
        if self.entries.contains_key(&virt.page_number()) {
            return Err(MappingError::AlreadyMapped);
        }

        let frame = self.frames.alloc().ok_or(MappingError::OutOfMemory)?;
        log::trace!("[MM] map {} -> frame {} {:?}", virt, frame.number(), flags);
        self.entries.insert(
            virt.page_number(),
            PageTableEntry {
                frame,
                flags: flags | PageFlags::PRESENT,
            },
        );
        Ok(())
    }

    /// Unmap the page at `virt`, returning its frame to the pool.
    pub fn unmap_page(&mut self, virt: VirtAddr) -> Result<(), MappingError> {
        self.entries
            .remove(&virt.page_number())
            .map(|_| ())
            .ok_or(MappingError::NotMapped)
    }

    /// Flags of the page containing `virt`, or `None` if it is not mapped.
    #[inline]
    pub fn translate(&self, virt: VirtAddr) -> Option<PageFlags> {
        self.entries.get(&virt.page_number()).map(|entry| entry.flags)
    }

    /// Number of mapped pages.
    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    /// Copy `buf.len()` bytes starting at `virt` out of this address space.
    pub fn read(&self, virt: VirtAddr, buf: &mut [u8]) -> Result<(), MappingError> {
        self.check_present(virt, buf.len())?;

        let mut addr = virt.as_usize();
        let mut done = 0;
        while done < buf.len() {
            let (vpn, offset) = (addr >> PAGE_SHIFT, addr & PAGE_MASK);
            let n = (PAGE_SIZE - offset).min(buf.len() - done);
            let entry = self.entries.get(&vpn).ok_or(MappingError::NotMapped)?;
            buf[done..done + n].copy_from_slice(&entry.frame.bytes()[offset..offset + n]);
            addr += n;
            done += n;
        }
        Ok(())
    }

    /// Copy `data` into this address space starting at `virt`.
    ///
    /// Ignores `WRITABLE`: this is how the loader fills read-only code pages.
    pub fn write(&mut self, virt: VirtAddr, data: &[u8]) -> Result<(), MappingError> {
        self.check_present(virt, data.len())?;

        let mut addr = virt.as_usize();
        let mut done = 0;
        while done < data.len() {
            let (vpn, offset) = (addr >> PAGE_SHIFT, addr & PAGE_MASK);
            let n = (PAGE_SIZE - offset).min(data.len() - done);
            let entry = self.entries.get_mut(&vpn).ok_or(MappingError::NotMapped)?;
            entry.frame.bytes_mut()[offset..offset + n].copy_from_slice(&data[done..done + n]);
            addr += n;
            done += n;
        }
        Ok(())
    }

    fn check_present(&self, virt: VirtAddr, len: usize) -> Result<(), MappingError> {
        for vpn in page_range(virt, len)? {
            if !self.entries.contains_key(&vpn) {
                return Err(MappingError::NotMapped);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pages", &self.entries.len())
            .finish()
    }
}

/// Virtual page numbers touched by `len` bytes at `virt`.
fn page_range(virt: VirtAddr, len: usize) -> Result<Range<usize>, MappingError> {
    if len == 0 {
        return Ok(0..0);
    }
    let last = virt
        .as_usize()
        .checked_add(len - 1)
        .filter(|&last| last <= u32::MAX as usize)
        .ok_or(MappingError::Overflow)?;
    Ok(virt.page_number()..(last >> PAGE_SHIFT) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::address::{CODE_BASE, PHYS_BASE};

    fn space(frames: usize) -> (Arc<FrameAllocator>, AddressSpace) {
        let pool = Arc::new(FrameAllocator::new(frames));
        let space = AddressSpace::new(Arc::clone(&pool));
        (pool, space)
    }

    #[test]
    fn test_map_translate_unmap() {
        let (_pool, mut space) = space(4);
        let code = VirtAddr::new(CODE_BASE);
        space.map_page(code, PageFlags::USER_CODE).unwrap();

        let flags = space.translate(VirtAddr::new(CODE_BASE + 100)).unwrap();
        assert!(flags.contains(PageFlags::PRESENT | PageFlags::USER));
        assert!(!flags.contains(PageFlags::WRITABLE));
        assert!(space.translate(VirtAddr::new(CODE_BASE + 4096)).is_none());

        assert_eq!(space.map_page(code, PageFlags::USER_DATA), Err(MappingError::AlreadyMapped));
        space.unmap_page(code).unwrap();
        assert_eq!(space.unmap_page(code), Err(MappingError::NotMapped));
    }

    #[test]
    fn test_rejects_kernel_and_misaligned() {
        let (_pool, mut space) = space(4);
        assert_eq!(
            space.map_page(VirtAddr::new(PHYS_BASE), PageFlags::USER_DATA),
            Err(MappingError::InvalidPermissions)
        );
        assert_eq!(
            space.map_page(VirtAddr::new(CODE_BASE + 1), PageFlags::USER_DATA),
            Err(MappingError::MisalignedAddress)
        );
    }

    #[test]
    fn test_copy_across_page_boundary() {
        let (_pool, mut space) = space(4);
        space.map_page(VirtAddr::new(0x1000), PageFlags::USER_DATA).unwrap();
        space.map_page(VirtAddr::new(0x2000), PageFlags::USER_DATA).unwrap();

        space.write(VirtAddr::new(0x1ffe), b"span").unwrap();
        let mut buf = [0u8; 4];
        space.read(VirtAddr::new(0x1ffe), &mut buf).unwrap();
        assert_eq!(&buf, b"span");
    }

    #[test]
    fn test_partial_mapping_is_untouched() {
        let (_pool, mut space) = space(4);
        space.map_page(VirtAddr::new(0x1000), PageFlags::USER_DATA).unwrap();

        assert_eq!(space.write(VirtAddr::new(0x1ffe), b"span"), Err(MappingError::NotMapped));
        let mut buf = [0xFFu8; 2];
        space.read(VirtAddr::new(0x1ffe), &mut buf).unwrap();
        assert_eq!(buf, [0, 0]);
    }

    #[test]
    fn test_out_of_frames_and_reclaim() {
        let (pool, mut space) = space(1);
        space.map_page(VirtAddr::new(0x1000), PageFlags::USER_DATA).unwrap();
        assert_eq!(
            space.map_page(VirtAddr::new(0x2000), PageFlags::USER_DATA),
            Err(MappingError::OutOfMemory)
        );
        drop(space);
        assert_eq!(pool.free_frames(), 1);
    }
}

//! Memory management for user processes
//!
//! Provides:
//! - User virtual address types and the memory-map constants
//! - A bitmap allocator over a fixed pool of physical frames
//! - Per-process page tables with kernel-mode copy in/out
//!
//! # Security Principles
//! - All allocations are bounds-checked
//! - Frames are zeroed before they are handed out
//! - A frame is owned by exactly one page table entry

pub mod address;
pub mod frame;
pub mod paging;

pub use address::{VirtAddr, CODE_BASE, PAGE_SIZE, PHYS_BASE, USER_STACK_TOP, WORD_SIZE};
pub use frame::{FrameAllocator, PhysFrame};
pub use paging::{AddressSpace, MappingError, PageFlags};

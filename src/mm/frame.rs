//! Physical Frame Allocator
//!
//! Manages a fixed pool of physical frames using a bitmap allocator.
//!
//! # Design
//! - Each bit in the bitmap represents one 4KB frame
//! - Bit = 0: frame is free
//! - Bit = 1: frame is allocated
//!
//! Frames are handed out as [`PhysFrame`] values that own their backing
//! storage and give the frame back to the pool when dropped, so a process's
//! memory is reclaimed exactly when its address space goes away.
//!
//! # Security Properties
//! - All allocated frames are zeroed before returning
//! - Double-free is detected and causes a panic
//! - The allocator is protected by a spinlock

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use super::address::PAGE_SIZE;

/// Frame allocator state.
struct FrameAllocatorInner {
    /// Bitmap tracking allocated frames (1 = allocated, 0 = free).
    bitmap: Vec<u8>,
    /// Number of free frames remaining.
    free_count: usize,
    /// Total frames under management.
    total_frames: usize,
}

impl FrameAllocatorInner {
    fn new(total_frames: usize) -> Self {
        Self {
            bitmap: vec![0; total_frames.div_ceil(8)],
            free_count: total_frames,
            total_frames,
        }
    }

    /// Set a bit in the bitmap.
    #[inline]
    fn set_bit(&mut self, frame: usize, allocated: bool) {
        let byte_idx = frame / 8;
        let bit_idx = frame % 8;

        if allocated {
            self.bitmap[byte_idx] |= 1 << bit_idx;
        } else {
            self.bitmap[byte_idx] &= !(1 << bit_idx);
        }
    }

    /// Check if a frame is allocated.
    #[inline]
    fn is_allocated(&self, frame: usize) -> bool {
        if frame >= self.total_frames {
            return true; // Out of range = allocated
        }

        (self.bitmap[frame / 8] >> (frame % 8)) & 1 == 1
    }

    /// Allocate a single frame.
    fn alloc(&mut self) -> Option<usize> {
        if self.free_count == 0 {
            return None;
        }

        // Linear search for a free frame
        for (byte_idx, byte) in self.bitmap.iter().enumerate() {
            if *byte == 0xFF {
                continue;
            }
            for bit_idx in 0..8 {
                let frame = byte_idx * 8 + bit_idx;
                if frame >= self.total_frames {
                    break;
                }
                if !self.is_allocated(frame) {
                    self.set_bit(frame, true);
                    self.free_count -= 1;
                    return Some(frame);
                }
            }
        }

        None
    }

    /// Free a previously allocated frame.
    fn free(&mut self, frame: usize) {
        if frame >= self.total_frames {
            panic!("Attempted to free frame outside managed range: {}", frame);
        }

        if !self.is_allocated(frame) {
            panic!("Double free detected for frame: {}", frame);
        }

        self.set_bit(frame, false);
        self.free_count += 1;
    }
}

/// A pool of physical frames shared by every address space of one kernel.
pub struct FrameAllocator {
    inner: Mutex<FrameAllocatorInner>,
}

impl FrameAllocator {
    /// Create a pool managing `total_frames` frames.
    pub fn new(total_frames: usize) -> Self {
        Self {
            inner: Mutex::new(FrameAllocatorInner::new(total_frames)),
        }
    }

    /// Allocate a single zeroed frame.
    ///
    /// Returns `None` if no frames are available.
    pub fn alloc(self: &Arc<Self>) -> Option<PhysFrame> {
        let number = self.inner.lock().alloc()?;
        Some(PhysFrame {
            number,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            pool: Arc::clone(self),
        })
    }

    /// Get the number of free frames remaining.
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_count
    }

    /// Total frames under management.
    pub fn total_frames(&self) -> usize {
        self.inner.lock().total_frames
    }

    fn free(&self, number: usize) {
        self.inner.lock().free(number);
    }
}

impl fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FrameAllocator")
            .field("free", &inner.free_count)
            .field("total", &inner.total_frames)
            .finish()
    }
}

/// An allocated frame. Returned to its pool on drop.
pub struct PhysFrame {
    number: usize,
    data: Box<[u8]>,
    pool: Arc<FrameAllocator>,
}

impl PhysFrame {
    /// Frame number within the pool.
    #[inline]
    pub fn number(&self) -> usize {
        self.number
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysFrame({})", self.number)
    }
}

impl Drop for PhysFrame {
    fn drop(&mut self) {
        self.pool.free(self.number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_until_exhausted() {
        let pool = Arc::new(FrameAllocator::new(3));
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());
        assert_eq!(pool.free_frames(), 0);
        assert_ne!(a.number(), b.number());
        assert_ne!(b.number(), c.number());
    }

    #[test]
    fn test_drop_returns_frame() {
        let pool = Arc::new(FrameAllocator::new(9));
        let frame = pool.alloc().unwrap();
        let number = frame.number();
        assert_eq!(pool.free_frames(), 8);
        drop(frame);
        assert_eq!(pool.free_frames(), 9);

        // The lowest free frame is handed out again.
        assert_eq!(pool.alloc().unwrap().number(), number);
    }

    #[test]
    fn test_frames_are_zeroed() {
        let pool = Arc::new(FrameAllocator::new(1));
        let mut frame = pool.alloc().unwrap();
        frame.bytes_mut()[17] = 0xAB;
        drop(frame);
        let frame = pool.alloc().unwrap();
        assert!(frame.bytes().iter().all(|&b| b == 0));
        assert_eq!(frame.bytes().len(), PAGE_SIZE);
    }
}

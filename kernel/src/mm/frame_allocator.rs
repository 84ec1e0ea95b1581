//! Physical frame allocator.
//!
//! A flat bitmap over up to 512 MiB of physical RAM at 4 KiB granularity, as
//! specified in spec §4.2: `512 MiB / 4 KiB = 131072` frames, one bit each,
//! for a 16 KiB bitmap. Frames above the tracked range are simply never
//! marked free and can never be allocated -- machines with more RAM still
//! boot, they just don't see the excess.

use core::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use super::{bootloader::MemoryMap, FrameNumber, PhysicalAddress, FRAME_SIZE};

/// Total frames tracked by the bitmap (512 MiB worth at 4 KiB each).
pub const MAX_TRACKED_FRAMES: usize = (512 * 1024 * 1024) / FRAME_SIZE;
/// Bitmap size in bytes (16 KiB).
pub const BITMAP_BYTES: usize = MAX_TRACKED_FRAMES / 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    /// No single frame is free.
    OutOfMemory,
    /// No run of `n` consecutive clear bits exists, even though `n` single
    /// frames may be free individually.
    NoContiguousRange,
    /// The requested region falls outside the tracked 512 MiB window.
    OutOfRange,
}

/// One tracked physical frame's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Free,
    Allocated,
    Reserved,
}

/// A region of frames withheld from the allocator (kernel image, MMIO,
/// bootloader-reserved ranges).
#[derive(Debug, Clone, Copy)]
pub struct ReservedRegion {
    pub start: FrameNumber,
    pub end: FrameNumber,
    pub description: &'static str,
}

/// Bitmap-backed physical frame allocator.
///
/// Bit value 1 means allocated-or-reserved; bit value 0 means free. A
/// separate reserved set is not kept -- reserved frames are marked
/// allocated at init time and never freed, which is sufficient since the
/// spec's only required distinction is "is this frame available to
/// `alloc_frame`".
pub struct FrameAllocator {
    bitmap: [u8; BITMAP_BYTES],
    /// One past the highest frame number ever marked free. Bounds the scan
    /// so `alloc_frame` doesn't walk the full 16 KiB bitmap once RAM is
    /// smaller than 512 MiB.
    high_water: usize,
    free_count: AtomicUsize,
    /// Next frame index to probe from, so repeated single-frame allocations
    /// don't all restart the scan at 0.
    next_hint: AtomicUsize,
}

impl FrameAllocator {
    const fn empty() -> Self {
        Self {
            bitmap: [0xFF; BITMAP_BYTES],
            high_water: 0,
            free_count: AtomicUsize::new(0),
            next_hint: AtomicUsize::new(0),
        }
    }

    fn frame_index(frame: FrameNumber) -> Option<usize> {
        let idx = frame.0 as usize;
        if idx < MAX_TRACKED_FRAMES {
            Some(idx)
        } else {
            None
        }
    }

    fn bit(&self, idx: usize) -> bool {
        self.bitmap[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_bit(&mut self, idx: usize, allocated: bool) {
        let byte = &mut self.bitmap[idx / 8];
        let mask = 1 << (idx % 8);
        let was_set = *byte & mask != 0;
        if allocated {
            *byte |= mask;
            if !was_set {
                self.free_count.fetch_sub(1, Ordering::Relaxed);
            }
        } else {
            *byte &= !mask;
            if was_set {
                self.free_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Marks `count` frames starting at `start` as free, for use by boot-time
    /// memory-map processing only.
    fn mark_free_range(&mut self, start: FrameNumber, count: usize) {
        let Some(start_idx) = Self::frame_index(start) else {
            return;
        };
        let end_idx = (start_idx + count).min(MAX_TRACKED_FRAMES);
        for idx in start_idx..end_idx {
            self.set_bit(idx, false);
        }
        self.high_water = self.high_water.max(end_idx);
    }

    fn mark_reserved_range(&mut self, start: FrameNumber, count: usize) {
        let Some(start_idx) = Self::frame_index(start) else {
            return;
        };
        let end_idx = (start_idx + count).min(MAX_TRACKED_FRAMES);
        for idx in start_idx..end_idx {
            self.set_bit(idx, true);
        }
    }

    /// Reserves `len` bytes starting at `phys` (MMIO, kernel image, etc).
    pub fn reserve_region(&mut self, phys: PhysicalAddress, len: usize) {
        let start = phys.frame_number();
        let count = len.div_ceil(FRAME_SIZE).max(1);
        self.mark_reserved_range(start, count);
    }

    pub fn add_reserved_region(&mut self, region: ReservedRegion) {
        let count = (region.end.0 - region.start.0) as usize;
        self.mark_reserved_range(region.start, count);
    }

    /// Allocates a single free frame.
    pub fn alloc_frame(&mut self) -> Result<FrameNumber, FrameAllocatorError> {
        let hint = self.next_hint.load(Ordering::Relaxed);
        for pass in 0..2 {
            let (lo, hi) = if pass == 0 {
                (hint, self.high_water)
            } else {
                (0, hint)
            };
            for idx in lo..hi {
                if !self.bit(idx) {
                    self.set_bit(idx, true);
                    self.next_hint.store(idx + 1, Ordering::Relaxed);
                    return Ok(FrameNumber(idx as u32));
                }
            }
        }
        Err(FrameAllocatorError::OutOfMemory)
    }

    /// Allocates `n` physically contiguous frames. Fails with
    /// `NoContiguousRange` if no run of `n` clear bits exists, even when `n`
    /// individually-free frames are scattered across the bitmap.
    pub fn alloc_frames(&mut self, n: usize) -> Result<FrameNumber, FrameAllocatorError> {
        if n == 0 {
            return Err(FrameAllocatorError::NoContiguousRange);
        }
        let mut run_start = None;
        let mut run_len = 0usize;
        for idx in 0..self.high_water {
            if !self.bit(idx) {
                if run_start.is_none() {
                    run_start = Some(idx);
                }
                run_len += 1;
                if run_len == n {
                    let start = run_start.unwrap();
                    for i in start..start + n {
                        self.set_bit(i, true);
                    }
                    return Ok(FrameNumber(start as u32));
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        Err(FrameAllocatorError::NoContiguousRange)
    }

    pub fn free_frame(&mut self, frame: FrameNumber) {
        if let Some(idx) = Self::frame_index(frame) {
            self.set_bit(idx, false);
        }
    }

    pub fn free_frames(&mut self, frame: FrameNumber, n: usize) {
        if let Some(start) = Self::frame_index(frame) {
            let end = (start + n).min(MAX_TRACKED_FRAMES);
            for idx in start..end {
                self.set_bit(idx, false);
            }
        }
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }
}

lazy_static! {
    pub static ref FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::empty());
}

/// Consumes the firmware memory map at boot: marks `Usable` (BIOS) /
/// `Conventional` (UEFI) ranges free, then subtracts the kernel image and
/// any bootloader-reserved range (spec §4.2).
pub fn init(mem_map: &MemoryMap, kernel_start: PhysicalAddress, kernel_end: PhysicalAddress) {
    let mut allocator = FRAME_ALLOCATOR.lock();

    for region in mem_map.usable_regions() {
        let start_frame = FrameNumber(region.start / FRAME_SIZE as u32);
        let frame_count = (region.len as usize) / FRAME_SIZE;
        if frame_count > 0 {
            allocator.mark_free_range(start_frame, frame_count);
        }
    }

    let kernel_frames = ((kernel_end.0 - kernel_start.0) as usize).div_ceil(FRAME_SIZE);
    allocator.mark_reserved_range(kernel_start.frame_number(), kernel_frames.max(1));

    // First megabyte: real-mode IVT, BDA, legacy video memory, BIOS ROM.
    allocator.mark_reserved_range(FrameNumber(0), 256);

    for region in mem_map.reserved_regions() {
        let start_frame = FrameNumber(region.start / FRAME_SIZE as u32);
        let frame_count = (region.len as usize).div_ceil(FRAME_SIZE);
        allocator.mark_reserved_range(start_frame, frame_count.max(1));
    }
}

/// A physical frame paired with a guard page of unmapped (non-present)
/// virtual memory immediately before and after it, returned by
/// [`crate::mm::vmm::alloc_guarded`].
pub struct GuardedRegion {
    pub base: FrameNumber,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_returns_same_frame() {
        let mut a = FrameAllocator::empty();
        a.mark_free_range(FrameNumber(0), 16);
        let f = a.alloc_frame().unwrap();
        a.free_frame(f);
        let f2 = a.alloc_frame().unwrap();
        // Not guaranteed to be the exact same frame given the hint cursor,
        // but it must be drawn from the now-free set.
        assert!(f2.0 < 16);
    }

    #[test]
    fn contiguous_fails_when_only_scattered_frames_are_free() {
        let mut a = FrameAllocator::empty();
        a.mark_free_range(FrameNumber(0), 4);
        // Re-allocate frame 1 and 3 so only 0 and 2 are free: no run of 2.
        a.set_bit(1, true);
        a.set_bit(3, true);
        assert_eq!(
            a.alloc_frames(2),
            Err(FrameAllocatorError::NoContiguousRange)
        );
        assert!(a.alloc_frame().is_ok());
    }

    #[test]
    fn reserved_region_is_never_allocated() {
        let mut a = FrameAllocator::empty();
        a.mark_free_range(FrameNumber(0), 8);
        a.mark_reserved_range(FrameNumber(2), 2);
        for _ in 0..6 {
            let f = a.alloc_frame().unwrap();
            assert!(f.0 < 2 || f.0 >= 4);
        }
        assert_eq!(a.alloc_frame(), Err(FrameAllocatorError::OutOfMemory));
    }
}

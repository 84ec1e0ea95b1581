//! Firmware memory map ingestion.
//!
//! Normalizes the Multiboot2 memory-map tag (legacy BIOS boot) and the EFI
//! memory-map tag (UEFI boot) into a single [`MemoryMap`] the frame
//! allocator consumes. Only `Available` (BIOS) / `CONVENTIONAL` (UEFI)
//! ranges become free frames; everything else is tracked as reserved so it
//! is never handed out even though it occupies address space within the
//! tracked 512 MiB window.

#![allow(dead_code)]

extern crate alloc;

use alloc::vec::Vec;
use multiboot2::{BootInformation, MemoryAreaType};

/// One raw range out of a firmware memory map, already reduced to
/// (start, length, usable).
#[derive(Debug, Clone, Copy)]
pub struct RawRegion {
    pub start: u32,
    pub len: u32,
    pub usable: bool,
}

/// A normalized memory map, regardless of which tag it was built from.
#[derive(Debug, Default)]
pub struct MemoryMap {
    regions: Vec<RawRegion>,
}

impl MemoryMap {
    pub fn usable_regions(&self) -> impl Iterator<Item = &RawRegion> {
        self.regions.iter().filter(|r| r.usable)
    }

    pub fn reserved_regions(&self) -> impl Iterator<Item = &RawRegion> {
        self.regions.iter().filter(|r| !r.usable)
    }

    pub fn total_usable_bytes(&self) -> u64 {
        self.usable_regions().map(|r| r.len as u64).sum()
    }

    /// Builds a map directly from already-normalized regions, bypassing a
    /// real Multiboot2 payload. Used by integration tests that exercise the
    /// frame allocator against a synthetic memory layout.
    pub fn from_raw_regions(regions: Vec<RawRegion>) -> Self {
        Self { regions }
    }
}

/// Builds a [`MemoryMap`] from a parsed Multiboot2 info structure, preferring
/// the EFI memory map tag (17/19) when present since it is authoritative on
/// UEFI boots, and otherwise falling back to the BIOS memory-map tag (6).
pub fn from_multiboot2(info: &BootInformation) -> MemoryMap {
    let mut regions = Vec::new();

    if let Some(efi_tag) = info.efi_memory_map_tag() {
        for desc in efi_tag.memory_areas() {
            regions.push(RawRegion {
                start: desc.physical_start() as u32,
                len: (desc.page_count() * 4096) as u32,
                usable: matches!(desc.ty(), 7 /* EfiConventionalMemory */),
            });
        }
        return MemoryMap { regions };
    }

    if let Some(mmap_tag) = info.memory_map_tag() {
        for area in mmap_tag.memory_areas() {
            regions.push(RawRegion {
                start: area.start_address() as u32,
                len: area.size() as u32,
                usable: area.typ() == MemoryAreaType::Available,
            });
        }
    }

    MemoryMap { regions }
}

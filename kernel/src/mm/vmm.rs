//! Kernel virtual memory manager.
//!
//! Installs the initial identity-mapped window covering the kernel image and
//! its heap, enables PAE/NX when the CPU supports them, and hands out the
//! [`PageMapper`] the rest of the kernel maps/unmaps/protects through (spec
//! §4.3). Per-process "address spaces" (`crate::process::memory`) are
//! logical regions inside this single mapper, not separate page tables.

#![allow(dead_code)]

use core::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;

use super::{
    frame_allocator::FrameAllocatorError,
    page_table::{PageMapper, PageTableHierarchy},
    FrameNumber, PageFlags, PhysicalAddress, VirtualAddress, FRAME_ALLOCATOR, FRAME_SIZE,
};
use crate::error::{KernelError, KernelResult};

/// End of the kernel's identity-mapped window -- 16 MiB covers kernel text,
/// rodata, bss, early heap, and page table bootstrap frames with headroom.
pub const IDENTITY_MAP_END: u32 = 16 * 1024 * 1024;

static NX_SUPPORTED: AtomicBool = AtomicBool::new(false);

pub fn nx_supported() -> bool {
    NX_SUPPORTED.load(Ordering::Relaxed)
}

/// Called once from `arch::x86::mod::init` after CPUID features have been
/// read, before the kernel hierarchy is built.
pub fn set_nx_supported(supported: bool) {
    NX_SUPPORTED.store(supported, Ordering::Relaxed);
    if supported {
        // SAFETY: setting IA32_EFER.NXE (bit 11) requires PAE already be
        // enabled, which it is by the time this runs; the MSR is
        // architecturally defined and present whenever CPUID reports NX.
        unsafe {
            let efer_lo: u32;
            let efer_hi: u32;
            core::arch::asm!(
                "rdmsr",
                in("ecx") 0xC000_0080u32,
                out("eax") efer_lo,
                out("edx") efer_hi,
                options(nostack, preserves_flags),
            );
            let new_lo = efer_lo | (1 << 11);
            core::arch::asm!(
                "wrmsr",
                in("ecx") 0xC000_0080u32,
                in("eax") new_lo,
                in("edx") efer_hi,
                options(nostack, preserves_flags),
            );
        }
    }
}

lazy_static! {
    /// The single page mapper backing the whole kernel.
    pub static ref KERNEL_MAPPER: PageMapper = {
        let hierarchy = PageTableHierarchy::new().expect("bootstrap PDPT allocation");
        PageMapper::new(hierarchy)
    };
}

/// Identity-maps `[0, IDENTITY_MAP_END)` using 2 MiB large pages where
/// alignment allows, falling back to 4 KiB pages for the tail, then loads
/// CR3 and enables paging (CR0.PG) plus PAE (CR4.PAE).
pub fn init_kernel_address_space() {
    // SAFETY: enables PAE before paging is turned on, as the architecture
    // requires; CR4 bit 5 is PAE, no other state is touched.
    unsafe {
        let mut cr4: u32;
        core::arch::asm!("mov {0:e}, cr4", out(reg) cr4, options(nostack, preserves_flags));
        cr4 |= 1 << 5;
        core::arch::asm!("mov cr4, {0:e}", in(reg) cr4, options(nostack, preserves_flags));
    }

    let large_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::GLOBAL;
    let mut addr = 0u32;
    while addr + (2 * 1024 * 1024) <= IDENTITY_MAP_END {
        let va = VirtualAddress(addr);
        let pa = PhysicalAddress(addr);
        let _ = KERNEL_MAPPER.map_large(va, pa, large_flags);
        addr += 2 * 1024 * 1024;
    }
    let small_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::GLOBAL;
    while addr < IDENTITY_MAP_END {
        let va = VirtualAddress(addr);
        let pa = PhysicalAddress(addr);
        let _ = KERNEL_MAPPER.map(va, pa, small_flags);
        addr += FRAME_SIZE as u32;
    }

    let cr3 = KERNEL_MAPPER.cr3_value();
    // SAFETY: loads the freshly-built PDPT physical address into CR3, then
    // sets CR0.PG to enable paging. The identity map above guarantees the
    // instruction pointer remains valid across the transition.
    unsafe {
        core::arch::asm!("mov cr3, {0:e}", in(reg) cr3, options(nostack, preserves_flags));
        let mut cr0: u32;
        core::arch::asm!("mov {0:e}, cr0", out(reg) cr0, options(nostack, preserves_flags));
        cr0 |= 1 << 31;
        core::arch::asm!("mov cr0, {0:e}", in(reg) cr0, options(nostack, preserves_flags));
    }
}

/// A guard-bracketed virtual region: `count` usable pages with one
/// non-present page immediately before and after, so an off-by-one walk in
/// either direction faults instead of corrupting an adjacent allocation
/// (spec §4.2's `alloc_guarded`, exercised by scenario 6 in §8).
pub struct GuardedRegion {
    pub base: VirtualAddress,
    pub count: usize,
}

impl GuardedRegion {
    pub fn guard_before(&self) -> VirtualAddress {
        VirtualAddress(self.base.0 - FRAME_SIZE as u32)
    }

    pub fn guard_after(&self) -> VirtualAddress {
        VirtualAddress(self.base.0 + (self.count * FRAME_SIZE) as u32)
    }
}

/// Allocates `n` frames, maps them contiguously starting at `at`, and
/// deliberately leaves the pages immediately before and after unmapped.
/// The caller picks `at` from a region of the address space it owns (e.g.
/// the kernel heap's guard band, or a thread's kernel-stack slot) -- this
/// function only arranges the mapping, it does not reserve virtual address
/// space on its own.
pub fn alloc_guarded(at: VirtualAddress, n: usize) -> KernelResult<GuardedRegion> {
    let first = FRAME_ALLOCATOR
        .lock()
        .alloc_frames(n)
        .map_err(map_alloc_err)?;
    for i in 0..n {
        let va = at + i * FRAME_SIZE;
        let pa = PhysicalAddress(first.address().0 + (i * FRAME_SIZE) as u32);
        KERNEL_MAPPER
            .map(va, pa, PageFlags::PRESENT | PageFlags::WRITABLE)
            .map_err(|_| KernelError::ResourceExhausted {
                resource: "kernel virtual address space",
            })?;
    }
    Ok(GuardedRegion { base: at, count: n })
}

fn map_alloc_err(e: FrameAllocatorError) -> KernelError {
    match e {
        FrameAllocatorError::OutOfMemory => KernelError::ResourceExhausted { resource: "physical frames" },
        FrameAllocatorError::NoContiguousRange => {
            KernelError::ResourceExhausted { resource: "contiguous physical frames" }
        }
        FrameAllocatorError::OutOfRange => KernelError::InvalidArgument {
            name: "address",
            value: "outside tracked memory",
        },
    }
}

/// A process's logical view into the kernel's single page hierarchy.
/// Distinct processes can still be isolated in principle (separate
/// [`PageTableHierarchy`] instances) but the scheduler in this core never
/// switches CR3 between them -- see spec §1 Non-goals on SMP/isolation.
pub struct VirtualMemoryManager {
    is_kernel: bool,
}

impl VirtualMemoryManager {
    pub fn kernel() -> Self {
        Self { is_kernel: true }
    }

    pub fn new_process() -> Self {
        Self { is_kernel: false }
    }

    pub fn map(&self, va: VirtualAddress, pa: PhysicalAddress, flags: PageFlags) -> KernelResult<()> {
        KERNEL_MAPPER.map(va, pa, flags).map_err(|_| KernelError::AlreadyExists {
            resource: "virtual mapping",
            id: va.0 as u64,
        })
    }

    pub fn unmap(&self, va: VirtualAddress) -> KernelResult<PhysicalAddress> {
        KERNEL_MAPPER.unmap(va).map_err(|_| KernelError::NotFound {
            resource: "virtual mapping",
            id: va.0 as u64,
        })
    }

    pub fn protect(&self, va: VirtualAddress, flags: PageFlags) -> KernelResult<()> {
        KERNEL_MAPPER.protect(va, flags).map_err(|_| KernelError::NotFound {
            resource: "virtual mapping",
            id: va.0 as u64,
        })
    }

    pub fn is_kernel(&self) -> bool {
        self.is_kernel
    }
}

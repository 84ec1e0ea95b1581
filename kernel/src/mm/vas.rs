//! Per-process view into the kernel's single page hierarchy (spec §4.3).
//!
//! There is one page tree for the whole kernel
//! ([`crate::mm::vmm::KERNEL_MAPPER`]); a [`VirtualAddressSpace`] tracks
//! which pages a given process has claimed from it, for `brk`, stack
//! teardown on exit, and `fork` bookkeeping. Mapping and unmapping always go
//! through `KERNEL_MAPPER` -- this type carries no page table of its own.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use crate::{
    error::KernelError,
    mm::{vmm::KERNEL_MAPPER, FrameNumber, PageFlags, VirtualAddress, FRAME_ALLOCATOR, PAGE_SIZE},
    process::memory::layout,
};

/// Claims one process's slice of the shared page hierarchy.
pub struct VirtualAddressSpace {
    #[cfg(feature = "alloc")]
    mapped_pages: Vec<usize>,
    heap_brk: usize,
    stack_top: usize,
    user_stack_base: usize,
    user_stack_size: usize,
}

impl Default for VirtualAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualAddressSpace {
    pub fn new() -> Self {
        let user_stack_base = layout::STACK_END - layout::DEFAULT_STACK_SIZE;
        Self {
            #[cfg(feature = "alloc")]
            mapped_pages: Vec::new(),
            heap_brk: layout::HEAP_START,
            stack_top: layout::STACK_END,
            user_stack_base,
            user_stack_size: layout::DEFAULT_STACK_SIZE,
        }
    }

    /// Resets bookkeeping for a fresh program image. Kernel space is already
    /// mapped in `KERNEL_MAPPER`; there's nothing process-specific to install
    /// until pages are actually claimed.
    pub fn init(&mut self) -> Result<(), KernelError> {
        self.heap_brk = layout::HEAP_START;
        Ok(())
    }

    /// Maps one page at `vaddr` in the shared hierarchy, backed by a freshly
    /// allocated physical frame, and records it as owned by this space.
    pub fn map_page(&mut self, vaddr: usize, flags: PageFlags) -> Result<(), KernelError> {
        let vaddr = vaddr & !(PAGE_SIZE - 1);
        let frame = FRAME_ALLOCATOR
            .lock()
            .alloc_frame()
            .map_err(|_| KernelError::ResourceExhausted {
                resource: "physical frame",
            })?;
        KERNEL_MAPPER
            .map(VirtualAddress::new(vaddr as u32), frame.address(), flags)
            .map_err(|_| KernelError::InvalidArgument {
                name: "vaddr",
                value: "already mapped",
            })?;
        #[cfg(feature = "alloc")]
        self.mapped_pages.push(vaddr);
        Ok(())
    }

    /// Unmaps the pages covering `[base, base+size)`.
    pub fn unmap(&mut self, base: usize, size: usize) -> Result<(), KernelError> {
        let start = base & !(PAGE_SIZE - 1);
        let num_pages = size.div_ceil(PAGE_SIZE);
        for i in 0..num_pages {
            let vaddr = start + i * PAGE_SIZE;
            let _ = KERNEL_MAPPER.unmap(VirtualAddress::new(vaddr as u32));
            #[cfg(feature = "alloc")]
            self.mapped_pages.retain(|&v| v != vaddr);
        }
        Ok(())
    }

    /// Unmaps every page this process has claimed. Called before loading a
    /// new program image (`execve`) and on process exit.
    pub fn clear(&mut self) {
        #[cfg(feature = "alloc")]
        for vaddr in core::mem::take(&mut self.mapped_pages) {
            let _ = KERNEL_MAPPER.unmap(VirtualAddress::new(vaddr as u32));
        }
        self.heap_brk = layout::HEAP_START;
    }

    /// Adopts another process's region bookkeeping for `fork`. The page
    /// hierarchy is shared, so the pages stay mapped as-is; this only
    /// records that the new process also claims them, for accounting and
    /// eventual unmap on exit.
    #[cfg(feature = "alloc")]
    pub fn clone_from(&mut self, other: &VirtualAddressSpace) -> Result<(), KernelError> {
        self.mapped_pages = other.mapped_pages.clone();
        self.heap_brk = other.heap_brk;
        self.stack_top = other.stack_top;
        self.user_stack_base = other.user_stack_base;
        self.user_stack_size = other.user_stack_size;
        Ok(())
    }

    /// CR3 value identifying the page hierarchy backing this space. Every
    /// process shares [`KERNEL_MAPPER`], so this is constant across
    /// processes; kept for the page-walk helpers in `syscall::memory` and
    /// `process::signal_delivery` that select a mapper by root.
    pub fn get_page_table(&self) -> u32 {
        KERNEL_MAPPER.cr3_value()
    }

    pub fn set_stack_top(&mut self, top: usize) {
        self.stack_top = top;
    }

    pub fn stack_top(&self) -> usize {
        self.stack_top
    }

    pub fn user_stack_base(&self) -> usize {
        self.user_stack_base
    }

    pub fn user_stack_size(&self) -> usize {
        self.user_stack_size
    }

    pub fn heap_start_addr(&self) -> usize {
        layout::HEAP_START
    }

    /// `brk` syscall support: with `Some(addr)` sets the break, with `None`
    /// just reads it back.
    pub fn brk(&mut self, new_brk: Option<usize>) -> VirtualAddress {
        if let Some(addr) = new_brk {
            self.heap_brk = addr;
        }
        VirtualAddress::new(self.heap_brk as u32)
    }
}

/// Selects a page hierarchy by CR3 root for callers that historically
/// walked a per-process table. JSOS has exactly one hierarchy
/// ([`KERNEL_MAPPER`]), so `root` is accepted for API compatibility and
/// otherwise unused.
pub struct RootMapper;

/// # Safety
/// `root` identifies a page hierarchy; JSOS has exactly one, so there is no
/// aliasing or lifetime requirement left for the caller to uphold.
pub unsafe fn create_mapper_from_root_pub(_root: u32) -> RootMapper {
    RootMapper
}

impl RootMapper {
    /// Translates `va` and returns the backing frame plus a conservative
    /// flags value (callers only check presence, never the exact bits).
    pub fn translate_page(
        &self,
        va: VirtualAddress,
    ) -> Result<(FrameNumber, PageFlags), KernelError> {
        KERNEL_MAPPER
            .translate(va)
            .map(|pa| (pa.frame_number(), PageFlags::PRESENT))
            .ok_or(KernelError::InvalidAddress {
                addr: va.as_u32() as usize,
            })
    }
}

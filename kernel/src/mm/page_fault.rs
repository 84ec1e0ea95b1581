//! Page fault handling framework.
//!
//! The architecture-specific #PF trap handler (`arch::x86::idt`) decodes
//! CR2 and the error code into a [`PageFaultInfo`] and calls
//! [`handle_page_fault`]. A fault on a guard page (spec §4.2's
//! `alloc_guarded`, scenario 6 in §8) is reported here rather than treated
//! as an ordinary unmapped-memory fault: in kernel context it is logged and
//! escalated to panic, in user context it is translated into `SIGSEGV`
//! delivery against the faulting process.

#![allow(dead_code)]

use crate::{
    error::KernelError,
    mm::{PageFlags, VirtualAddress, FRAME_SIZE},
};

/// Decoded #PF error code bits (Intel SDM 4.7).
#[derive(Debug, Clone, Copy)]
pub struct PageFaultErrorCode(pub u32);

impl PageFaultErrorCode {
    pub fn present(&self) -> bool {
        self.0 & 0x1 != 0
    }
    pub fn write(&self) -> bool {
        self.0 & 0x2 != 0
    }
    pub fn user_mode(&self) -> bool {
        self.0 & 0x4 != 0
    }
    pub fn reserved_write(&self) -> bool {
        self.0 & 0x8 != 0
    }
    pub fn instruction_fetch(&self) -> bool {
        self.0 & 0x10 != 0
    }
}

/// Fully decoded page fault, handed to [`handle_page_fault`] by the trap
/// entry point.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    pub faulting_address: VirtualAddress,
    pub error: PageFaultErrorCode,
}

/// Outcome of fault resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultOutcome {
    /// Demand-paged / grew the heap; the faulting instruction can retry.
    Resolved,
    /// Unrecoverable in kernel context: caller should panic.
    Fatal,
    /// Unrecoverable in user context: caller should deliver SIGSEGV to the
    /// current process.
    SegFault,
}

/// Resolves a page fault. Order of checks:
/// 1. Is the fault on a registered guard page? -> `SegFault`/`Fatal`.
/// 2. Is it a recognized demand-paging case (stack growth, lazy heap)? ->
///    attempt resolution via [`crate::mm::demand_paging`].
/// 3. Otherwise: fatal in kernel context, `SegFault` in user context.
pub fn handle_page_fault(info: PageFaultInfo) -> PageFaultOutcome {
    let addr = info.faulting_address;

    if crate::mm::demand_paging::is_guard_page(addr) {
        log::error!(
            "page fault on guard page at {:#x} (write={}, user={})",
            addr.0,
            info.error.write(),
            info.error.user_mode()
        );
        return if info.error.user_mode() {
            PageFaultOutcome::SegFault
        } else {
            PageFaultOutcome::Fatal
        };
    }

    if crate::mm::demand_paging::try_resolve(addr, info.error.write()).is_ok() {
        return PageFaultOutcome::Resolved;
    }

    log::error!(
        "unresolved page fault at {:#x} (present={}, write={}, user={}, fetch={})",
        addr.0,
        info.error.present(),
        info.error.write(),
        info.error.user_mode(),
        info.error.instruction_fetch()
    );

    if info.error.user_mode() {
        PageFaultOutcome::SegFault
    } else {
        PageFaultOutcome::Fatal
    }
}

/// Flags for a freshly demand-paged user page.
pub fn default_user_page_flags() -> PageFlags {
    PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER
}

pub const fn page_aligned(addr: VirtualAddress) -> bool {
    addr.0 % FRAME_SIZE as u32 == 0
}

pub type PageFaultResult = Result<(), KernelError>;

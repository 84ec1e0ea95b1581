//! User space memory validation utilities.
//!
//! There is one page hierarchy for the whole kernel (spec §4.3), so
//! validating a user pointer means walking that same hierarchy rather than
//! selecting a per-process one.

use crate::mm::{vmm::KERNEL_MAPPER, PhysicalAddress, VirtualAddress};

/// i686 user space is the low 3GB of the 4GB address space; the top 1GB is
/// reserved for the kernel (`crate::process::memory::layout`).
pub fn is_user_addr_valid(addr: usize) -> bool {
    addr < 0xC000_0000
}

/// Translate a virtual address to its backing physical address, if mapped.
pub fn translate_address(addr: usize) -> Option<PhysicalAddress> {
    KERNEL_MAPPER.translate(VirtualAddress::new(addr as u32))
}

/// Whether `addr` is mapped and reachable from ring 3.
pub fn is_user_accessible(addr: usize) -> bool {
    is_user_addr_valid(addr) && KERNEL_MAPPER.is_user_mapped(VirtualAddress::new(addr as u32))
}

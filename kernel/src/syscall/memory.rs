//! Memory management system calls (spec §4.11): `sbrk`, `mmap`, `munmap`.
//!
//! JSOS has a single shared page hierarchy (`crate::mm::vas`), so these
//! calls only track which pages the calling process has claimed out of it;
//! there is no per-process page table to switch.

#[cfg(feature = "alloc")]
extern crate alloc;

use core::sync::atomic::{AtomicUsize, Ordering};

use super::{SyscallError, SyscallResult};
use crate::{
    mm::{user_validation, PageFlags, PAGE_SIZE},
    process,
};

/// Mapping is not backed by any file (zero-filled). JSOS has no file-backed
/// mmap; every mapping is anonymous.
pub const MAP_ANONYMOUS: usize = 0x20;

/// Start of the region `sys_mmap` hands out addresses from. Sits above the
/// heap and below the user stack (`crate::process::memory::layout`).
const MMAP_BASE: usize = 0x4000_0000;

static NEXT_MMAP_ADDR: AtomicUsize = AtomicUsize::new(MMAP_BASE);

/// Map anonymous memory into the process address space (`mmap`).
///
/// # Arguments
/// - `length`: Size of the mapping in bytes (rounded up to page size).
/// - `flags`: Must include `MAP_ANONYMOUS`; JSOS has no file-backed mmap.
///
/// # Returns
/// Address of the new mapping on success.
pub fn sys_mmap(length: usize, flags: usize) -> SyscallResult {
    if length == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    if flags & MAP_ANONYMOUS == 0 {
        return Err(SyscallError::InvalidArgument);
    }

    let _proc = process::current_process().ok_or(SyscallError::InvalidState)?;

    let aligned_len = length.div_ceil(PAGE_SIZE) * PAGE_SIZE;
    let base = NEXT_MMAP_ADDR.fetch_add(aligned_len, Ordering::SeqCst);

    if !user_validation::is_user_addr_valid(base + aligned_len) {
        return Err(SyscallError::OutOfMemory);
    }

    let proc = process::current_process().ok_or(SyscallError::InvalidState)?;
    let mut memory_space = proc.memory_space.lock();
    for page in (0..aligned_len).step_by(PAGE_SIZE) {
        memory_space
            .map_page(base + page, PageFlags::USER_RW)
            .map_err(|_| SyscallError::OutOfMemory)?;
    }

    Ok(base)
}

/// Unmap a memory region (`munmap`).
///
/// # Arguments
/// - `addr`: Start address of the region to unmap (must be page-aligned).
/// - `length`: Length of the region in bytes.
pub fn sys_munmap(addr: usize, length: usize) -> SyscallResult {
    if addr == 0 || length == 0 {
        return Err(SyscallError::InvalidArgument);
    }
    if addr & (PAGE_SIZE - 1) != 0 {
        return Err(SyscallError::InvalidArgument);
    }
    if !user_validation::is_user_addr_valid(addr) {
        return Err(SyscallError::InvalidPointer);
    }

    let proc = process::current_process().ok_or(SyscallError::InvalidState)?;
    let mut memory_space = proc.memory_space.lock();
    memory_space
        .unmap(addr, length)
        .map_err(|_| SyscallError::InvalidArgument)?;

    Ok(0)
}

/// Set or query the program break (`sbrk`).
///
/// If `addr` is 0, returns the current break. Otherwise attempts to move
/// the break to `addr`.
pub fn sys_brk(addr: usize) -> SyscallResult {
    let proc = process::current_process().ok_or(SyscallError::InvalidState)?;
    let mut memory_space = proc.memory_space.lock();

    let new_break = if addr == 0 { None } else { Some(addr) };
    let result = memory_space.brk(new_break);

    Ok(result.as_usize())
}

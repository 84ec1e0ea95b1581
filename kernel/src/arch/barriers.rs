//! Memory barrier abstractions for i686.
//!
//! Centralizes fence operations so non-arch code does not scatter inline
//! assembly around the kernel.

/// Full memory fence: MFENCE semantics via the strongest atomic ordering.
#[inline(always)]
pub fn memory_fence() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Data synchronization barrier. i686's memory model already orders stores
/// ahead of dependent loads, so this is equivalent to [`memory_fence`].
#[inline(always)]
pub fn data_sync_barrier() {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

/// Instruction synchronization barrier. No-op on i686: the unified
/// instruction/data cache and strongly-ordered pipeline make an explicit
/// barrier unnecessary outside of self-modifying code, which this kernel
/// does not generate.
#[inline(always)]
pub fn instruction_sync_barrier() {}

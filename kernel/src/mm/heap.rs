//! Kernel heap.
//!
//! Backs `#[global_allocator]` with a `linked_list_allocator::LockedHeap`
//! over a statically reserved 4 MiB arena. The kernel's identity map already
//! covers this range (`vmm::IDENTITY_MAP_END`), so no extra page-table work
//! is needed before the allocator can hand out memory.

#![allow(dead_code, static_mut_refs)]

static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

/// Kernel heap size.
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Initializes the global allocator over the static heap arena. Must run
/// after paging is enabled (the arena lies inside the identity-mapped
/// window) and before any code that allocates.
pub fn init() {
    // SAFETY: `HEAP_MEMORY` is a private static used nowhere else; this
    // runs exactly once, before any allocation, so no alias exists yet.
    unsafe {
        let heap_start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
        crate::get_allocator().lock().init(heap_start, HEAP_SIZE);
    }
    log::info!("kernel heap ready: {} KiB", HEAP_SIZE / 1024);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    extern crate alloc;
    use alloc::{boxed::Box, vec::Vec};

    #[test]
    fn host_allocator_smoke_test() {
        let x = Box::new(42);
        assert_eq!(*x, 42);
        let mut v = Vec::new();
        for i in 0..100 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
    }
}

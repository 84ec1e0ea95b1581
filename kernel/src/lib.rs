//! JSOS kernel library.
//!
//! This library provides the core functionality for the JSOS kernel and
//! exports the items the bare-metal binary and host-side unit tests share.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
// naked_functions is stable since Rust 1.88.0, no feature flag needed
// Custom test runner only for bare-metal; host target uses standard #[test] harness.
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// On the bare-metal i686-jsos target, back the heap with a real allocator
// over the static arena reserved in `mm::heap`. On the host target (used for
// `cargo test`), delegate to the system allocator so Vec/String/alloc work
// in ordinary unit tests.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Get a reference to the global kernel heap allocator.
#[cfg(target_os = "none")]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod bootstrap;
pub mod config;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod irq;
pub mod logging;
pub mod mm;
pub mod net;
pub mod process;
pub mod raii;
pub mod sched;
pub mod serial;
pub mod sync;
mod syscall;
pub mod timer;

mod test_framework;

// Re-exported for tests and benchmarks.
pub use mm::{FrameNumber, MemoryRegion, FRAME_SIZE};
pub use sched::{Priority, SchedClass, Task};
pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, test_runner, BenchmarkRunner,
    QemuExitCode, Testable,
};

/// The real kernel entry point, called from `arch::x86::multiboot::kernel_entry`
/// once the CPU is in 32-bit protected mode with a valid stack.
///
/// `magic` is the multiboot2 bootloader magic value; `info_addr` is the
/// physical address of the multiboot2 information structure.
#[cfg(target_os = "none")]
pub fn kernel_main(magic: u32, info_addr: u32) -> ! {
    bootstrap::boot(magic, info_addr)
}

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("Allocation error: {:?}", layout);
}

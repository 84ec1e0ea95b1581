//! Frame allocator integration tests.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(jsos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec;

use jsos_kernel::{
    mm::{
        self,
        bootloader::{MemoryMap, RawRegion},
        frame_allocator::{self, FrameAllocatorError, FRAME_ALLOCATOR},
        FrameNumber, PhysicalAddress, FRAME_SIZE,
    },
    serial_println,
};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    // The global allocator is `LockedHeap::empty()` until this runs; every
    // test below pushes into a `Vec` at some point, directly or via the
    // frame allocator's own bookkeeping, so this has to happen before
    // `test_main` rather than inside any individual `#[test_case]`.
    mm::heap::init();
    test_main();
    loop {
        jsos_kernel::arch::halt();
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    jsos_kernel::test_panic_handler(info)
}

/// 16 MiB of usable RAM starting at 1 MiB, with nothing else reserved beyond
/// the first megabyte and the (zero-sized, for this synthetic map) kernel
/// image.
fn init_test_heap() {
    let map = MemoryMap::from_raw_regions(vec![RawRegion {
        start: 0x0010_0000,
        len: 16 * 1024 * 1024,
        usable: true,
    }]);
    frame_allocator::init(
        &map,
        PhysicalAddress::new(0x0010_0000),
        PhysicalAddress::new(0x0010_0000),
    );
}

#[test_case]
fn test_frame_allocator_init() {
    init_test_heap();

    let free = FRAME_ALLOCATOR.lock().free_frame_count();
    assert_eq!(free, (16 * 1024 * 1024) / FRAME_SIZE);

    serial_println!("[ok]");
}

#[test_case]
fn test_single_frame_allocation() {
    init_test_heap();

    let before = FRAME_ALLOCATOR.lock().free_frame_count();
    let frame = FRAME_ALLOCATOR
        .lock()
        .alloc_frame()
        .expect("failed to allocate single frame");
    let after = FRAME_ALLOCATOR.lock().free_frame_count();
    assert_eq!(after, before - 1);

    FRAME_ALLOCATOR.lock().free_frame(frame);
    assert_eq!(FRAME_ALLOCATOR.lock().free_frame_count(), before);

    serial_println!("[ok]");
}

#[test_case]
fn test_many_small_allocations() {
    init_test_heap();

    let mut frames = alloc::vec::Vec::new();
    for _ in 0..100 {
        let f = FRAME_ALLOCATOR
            .lock()
            .alloc_frames(10)
            .expect("failed to allocate 10 contiguous frames");
        frames.push(f);
    }

    for f in frames {
        FRAME_ALLOCATOR.lock().free_frames(f, 10);
    }

    let total = (16 * 1024 * 1024) / FRAME_SIZE;
    assert_eq!(FRAME_ALLOCATOR.lock().free_frame_count(), total);

    serial_println!("[ok]");
}

#[test_case]
fn test_contiguous_allocation_is_actually_contiguous() {
    init_test_heap();

    let base = FRAME_ALLOCATOR
        .lock()
        .alloc_frames(64)
        .expect("failed to allocate 64 contiguous frames");

    // The next single-frame allocation must not land inside the run we just
    // took, since the bitmap marked all 64 bits allocated.
    let single = FRAME_ALLOCATOR.lock().alloc_frame().unwrap();
    assert!(single.as_u64() < base.as_u64() || single.as_u64() >= base.as_u64() + 64);

    FRAME_ALLOCATOR.lock().free_frames(base, 64);
    FRAME_ALLOCATOR.lock().free_frame(single);

    serial_println!("[ok]");
}

#[test_case]
fn test_out_of_memory() {
    init_test_heap();

    let total = (16 * 1024 * 1024) / FRAME_SIZE;
    let result = FRAME_ALLOCATOR.lock().alloc_frames(total + 1);

    assert_eq!(result.unwrap_err(), FrameAllocatorError::NoContiguousRange);

    serial_println!("[ok]");
}

#[test_case]
fn test_reserved_region_is_never_allocated() {
    init_test_heap();

    // Reserve the first 4 frames of the usable range explicitly, on top of
    // what `init` already reserved for the first megabyte / kernel image.
    let reserved_start = PhysicalAddress::new(0x0010_0000);
    FRAME_ALLOCATOR.lock().reserve_region(reserved_start, 4 * FRAME_SIZE);

    for _ in 0..4 {
        let f = FRAME_ALLOCATOR.lock().alloc_frame().unwrap();
        assert!(f.as_u64() >= reserved_start.frame_number().as_u64() + 4);
    }

    serial_println!("[ok]");
}

#[test_case]
fn test_frame_address_roundtrip() {
    let frame = FrameNumber(256);
    let addr = frame.address();
    assert_eq!(addr.frame_number(), frame);
    assert_eq!(addr.as_usize(), 256 * FRAME_SIZE);

    serial_println!("[ok]");
}

#[test_case]
fn test_heap_allocation_after_init() {
    init_test_heap();

    // The global allocator is already live (see `_start`); it should
    // service ordinary `alloc`-backed types regardless of frame allocator
    // state.
    let mut v = alloc::vec::Vec::new();
    for i in 0..256u32 {
        v.push(i);
    }
    assert_eq!(v.len(), 256);
    assert_eq!(v[255], 255);

    serial_println!("[ok]");
}

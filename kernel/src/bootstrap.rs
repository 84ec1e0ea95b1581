//! Multi-stage kernel initialization.
//!
//! Called once, from [`crate::kernel_main`], with the CPU already in 32-bit
//! protected mode and a stack set up by the `_start` stub in
//! `arch::x86::multiboot`. Each stage depends on the one before it, so the
//! order here is load-bearing.

use crate::{arch, fs, mm, net, process, sched};

#[cfg(feature = "alloc")]
extern crate alloc;

extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
}

/// Run the full boot sequence and hand off to the scheduler. Never returns.
pub fn boot(magic: u32, info_addr: u32) -> ! {
    println!("[BOOTSTRAP] Starting multi-stage kernel initialization...");

    // Stage 1: CPU bring-up (GDT, IDT, PIC remap).
    println!("[BOOTSTRAP] Stage 1: hardware initialization");
    arch::x86::init();
    crate::logging::init();
    println!("[BOOTSTRAP] Architecture initialized");

    // Stage 2: memory management.
    println!("[BOOTSTRAP] Stage 2: memory management");
    const MULTIBOOT2_MAGIC: u32 = 0x3650_4d2b;
    if magic != MULTIBOOT2_MAGIC {
        panic!("not booted by a multiboot2-compliant loader (magic={magic:#x})");
    }
    // SAFETY: `info_addr` is the physical address of the multiboot2
    // information structure, passed by the bootloader and identity-mapped;
    // it is read exactly once, here, before any other code touches it.
    let boot_info = unsafe {
        multiboot2::BootInformation::load(info_addr as *const multiboot2::BootInformationHeader)
            .expect("malformed multiboot2 information structure")
    };
    #[cfg(feature = "alloc")]
    {
        let config = crate::config::from_multiboot2(&boot_info);
        log::set_max_level(config.log_level);
        crate::config::init(config);
    }
    let mem_map = mm::bootloader::from_multiboot2(&boot_info);
    // SAFETY: `__kernel_start`/`__kernel_end` are link-time symbols marking
    // the image's load extent (see `arch/x86/link.ld`); taking their address
    // (never dereferencing) is always sound.
    let (kernel_start, kernel_end) = unsafe {
        (
            core::ptr::addr_of!(__kernel_start) as u32,
            core::ptr::addr_of!(__kernel_end) as u32,
        )
    };
    mm::init(
        &mem_map,
        mm::PhysicalAddress(kernel_start),
        mm::PhysicalAddress(kernel_end),
    );
    println!("[BOOTSTRAP] Memory management initialized");

    // Stage 3: interrupt routing and process management.
    println!("[BOOTSTRAP] Stage 3: process management");
    arch::x86::rtc::init();
    crate::irq::init().expect("failed to initialize IRQ manager");
    crate::timer::init().expect("failed to initialize timer wheel");
    match arch::x86::apic::init() {
        Ok(()) => {
            // Divide by 16, count chosen to land close to
            // `arch::x86::idt::TIMER_TICK_MS`; exact calibration against the
            // APIC bus frequency happens on real hardware, this is the QEMU
            // TSC-deadline-free fallback.
            let _ = arch::x86::apic::setup_timer(
                arch::x86::idt::APIC_TIMER_VECTOR,
                0x03,
                1_000_000,
            );
        }
        Err(e) => {
            println!("[BOOTSTRAP] APIC unavailable ({e}), falling back to PIT+PIC IRQ0");
            arch::x86::timer::setup_timer(arch::x86::idt::TIMER_TICK_MS as u32);
            #[cfg(feature = "alloc")]
            let _ = crate::irq::register_handler(crate::irq::IrqNumber::new(0), pit_tick);
            let _ = crate::irq::enable_irq(crate::irq::IrqNumber::new(0));
        }
    }
    process::init();
    println!("[BOOTSTRAP] Process management initialized");

    // Stage 4: kernel services (VFS, network stack).
    println!("[BOOTSTRAP] Stage 4: kernel services");
    #[cfg(feature = "alloc")]
    {
        fs::init();
        println!("[BOOTSTRAP] VFS initialized");

        crate::drivers::init();

        net::init().expect("failed to initialize network stack");
        println!("[BOOTSTRAP] Network stack initialized");
    }

    // Stage 5: scheduler activation.
    println!("[BOOTSTRAP] Stage 5: scheduler activation");
    sched::init();
    #[cfg(feature = "alloc")]
    {
        let config = crate::config::get();
        sched::SCHEDULER.lock().set_algorithm(config.sched_algorithm);
        sched::SCHEDULER.lock().set_slice(config.sched_slice_ticks);
    }
    create_init_process();
    println!("[BOOTSTRAP] Scheduler activated - entering main scheduling loop");
    println!("[KERNEL] Boot sequence complete!");
    println!("BOOTOK");

    sched::run();
}

/// Create the `init` process. Falls back to a minimal placeholder process
/// if no `/sbin/init` binary is present on the root filesystem yet.
#[cfg(feature = "alloc")]
fn create_init_process() {
    use alloc::string::String;

    match process::lifecycle::create_process(String::from("init"), 0) {
        Ok(pid) => println!("[BOOTSTRAP] Init process created with PID {}", pid.0),
        Err(e) => println!("[BOOTSTRAP] Failed to create init process: {}", e),
    }
}

#[cfg(not(feature = "alloc"))]
fn create_init_process() {}

/// IRQ0 handler used only when no Local APIC is present; mirrors
/// `arch::x86::idt::apic_timer_interrupt`'s duties for the legacy PIT path.
#[cfg(feature = "alloc")]
fn pit_tick(_irq: crate::irq::IrqNumber) {
    crate::timer::timer_tick(arch::x86::idt::TIMER_TICK_MS);
    sched::tick();
}

//! `should_panic`-style test.
//!
//! Not a `#[test_case]`/`test_runner` binary: the one thing under test here
//! is that the kernel's own assertion macros actually panic on failure, so
//! the panic handler itself has to report success instead of failure.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use jsos_kernel::{exit_qemu, kernel_assert_eq, serial_println, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("should_panic::mismatched_assertion_panics...\t");
    mismatched_assertion_panics();

    // Reaching here means the assertion above did not panic: the real
    // failure mode for this test.
    serial_println!("[test did not panic]");
    exit_qemu(QemuExitCode::Failed)
}

fn mismatched_assertion_panics() {
    kernel_assert_eq!(1 + 1, 3);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[ok]");
    serial_println!("(expected panic: {})", info);
    exit_qemu(QemuExitCode::Success)
}

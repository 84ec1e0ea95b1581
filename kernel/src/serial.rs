//! Runtime COM1 serial console.
//!
//! Distinct from [`crate::arch::x86::early_serial`], which drives the same
//! UART with bare port I/O before `lazy_static`/heap allocation are
//! available. Once the kernel is past early boot, everything goes through
//! the `uart_16550`-backed writer here so boot messages, panics, and test
//! output are mirrored to COM1 at 115200 8-N-1.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

lazy_static! {
    pub static ref SERIAL1: Mutex<uart_16550::SerialPort> = {
        let mut port = crate::arch::x86::serial_init();
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _serial_print(args: fmt::Arguments) {
    use core::fmt::Write;

    crate::arch::x86::without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("serial write_fmt failed");
    });
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_serial_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => {
        $crate::serial_print!("{}\n", format_args!($($arg)*))
    };
}

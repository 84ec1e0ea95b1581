//! Programmable Interval Timer (8253/8254) bring-up.
//!
//! Used only to drive IRQ0 at a fixed rate before the Local APIC timer (see
//! `arch::x86::apic::setup_timer`) takes over; kept around as the fallback
//! on hardware/QEMU configurations without a usable APIC.

const PIT_FREQUENCY_HZ: u32 = 1_193_182;
const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Program PIT channel 0 for periodic interrupts at roughly `interval_ms`.
pub fn setup_timer(interval_ms: u32) {
    let divisor = PIT_FREQUENCY_HZ / (1000 / interval_ms.max(1));
    // SAFETY: 0x40/0x43 are the well-known PIT data/command ports; the
    // command byte selects channel 0, lobyte/hibyte access, mode 2 (rate
    // generator).
    unsafe {
        super::outb(PIT_COMMAND, 0x36);
        super::outb(PIT_CHANNEL0_DATA, (divisor & 0xFF) as u8);
        super::outb(PIT_CHANNEL0_DATA, (divisor >> 8) as u8);
    }
    crate::println!("[TIMER] PIT programmed for {interval_ms}ms intervals");
}

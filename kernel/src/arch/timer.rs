//! Architecture timer helpers used outside the main timer-wheel path:
//! millisecond uptime for wait-time accounting and a raw hardware
//! timestamp counter for short, low-overhead interval measurement.

/// Milliseconds of uptime, as tracked by the kernel's timer wheel.
pub fn get_ticks() -> u64 {
    crate::timer::get_uptime_ms()
}

/// Read the CPU's timestamp counter (`RDTSC`). Not wall-clock time -- only
/// useful for measuring short elapsed intervals on a single CPU.
pub fn read_hw_timestamp() -> u64 {
    let (low, high): (u32, u32);
    // SAFETY: RDTSC has no side effects and is available on every CPU JSOS
    // targets (i686 with TSC, which QEMU always exposes).
    unsafe {
        core::arch::asm!("rdtsc", out("eax") low, out("edx") high, options(nomem, nostack));
    }
    (low as u64) | ((high as u64) << 32)
}

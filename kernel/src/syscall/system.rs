//! Whole-system and process-signaling system calls: `kill`, `sleep`,
//! `reboot`, `halt`, and the `panic` debug syscall.

use super::{SyscallError, SyscallResult};
use crate::process::{current_thread, ProcessId};

/// Send a signal to a process (spec §4.11 `kill`).
pub fn sys_kill(pid: usize, signal: usize) -> SyscallResult {
    crate::process::lifecycle::kill_process(ProcessId(pid as u64), signal as i32)
        .map(|_| 0)
        .map_err(|_| SyscallError::ProcessNotFound)
}

/// Suspend the calling thread for at least `duration_ms` milliseconds
/// (spec §4.11 `sleep`).
pub fn sys_sleep(duration_ms: usize) -> SyscallResult {
    let thread = current_thread().ok_or(SyscallError::InvalidState)?;
    let wake_time = crate::timer::get_uptime_ms() + duration_ms as u64;
    thread.sleep_until(wake_time);
    crate::sched::schedule();
    Ok(0)
}

/// Reboot the machine via the keyboard controller's reset line (legacy
/// fallback present on every PC-compatible chipset since the AT).
pub fn sys_reboot() -> SyscallResult {
    crate::println!("[SYSCALL] reboot requested");
    // SAFETY: pulses the 8042 keyboard controller's CPU-reset output line.
    // This never returns; the machine resets before the next instruction.
    unsafe {
        crate::arch::x86::outb(0x64, 0xFE);
    }
    crate::arch::x86::halt();
}

/// Halt the machine (no return).
pub fn sys_halt() -> SyscallResult {
    crate::println!("[SYSCALL] halt requested");
    crate::arch::x86::halt();
}

/// Trigger a kernel panic from user space, for crash-path testing.
///
/// # Arguments
/// - `msg_ptr`: user-space pointer to a NUL-terminated message (may be 0).
/// - `msg_len`: message length in bytes.
pub fn sys_panic(msg_ptr: usize, msg_len: usize) -> SyscallResult {
    if msg_ptr != 0 && msg_len > 0 {
        super::validate_user_buffer(msg_ptr, msg_len)?;
        // SAFETY: msg_ptr/msg_len were validated above.
        let bytes = unsafe { core::slice::from_raw_parts(msg_ptr as *const u8, msg_len) };
        let msg = core::str::from_utf8(bytes).unwrap_or("<invalid utf8>");
        panic!("user-requested panic: {msg}");
    }
    panic!("user-requested panic");
}

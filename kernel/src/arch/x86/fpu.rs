//! FPU/SSE bring-up and state save/restore (`FXSAVE`/`FXRSTOR`), used by the
//! scheduler on a lazy-restore context switch and by signal delivery.

use core::arch::asm;

/// `FXSAVE`/`FXRSTOR` image. Must be 16-byte aligned per the instruction's
/// operand requirements.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub struct FpuState([u8; 512]);

impl FpuState {
    pub const fn new() -> Self {
        Self([0u8; 512])
    }
}

impl Default for FpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// Enable FPU and SSE on the current CPU. Called once per CPU during boot.
pub fn init() {
    // SAFETY: clears CR0.EM, sets CR0.MP and CR4.OSFXSR/OSXMMEXCPT -- the
    // standard i686 sequence for enabling hardware FP and SSE, then runs
    // FNINIT to reset the FPU to a known state.
    unsafe {
        asm!(
            "mov eax, cr0",
            "and ax, 0xFFFB",
            "or ax, 0x2",
            "mov cr0, eax",
            "mov eax, cr4",
            "or ax, 0x600",
            "mov cr4, eax",
            "fninit",
            out("eax") _,
        );
    }
}

/// Save the current FPU/SSE state into `state`.
pub fn save(state: &mut FpuState) {
    // SAFETY: `state` is 16-byte aligned (enforced by `repr(align(16))`) and
    // large enough for FXSAVE's 512-byte image.
    unsafe {
        asm!("fxsave [{0:e}]", in(reg) state as *mut FpuState, options(nostack));
    }
}

/// Restore FPU/SSE state previously captured by [`save`].
pub fn restore(state: &FpuState) {
    // SAFETY: `state` holds a previously-saved, validly-aligned FXSAVE image.
    unsafe {
        asm!("fxrstor [{0:e}]", in(reg) state as *const FpuState, options(nostack));
    }
}

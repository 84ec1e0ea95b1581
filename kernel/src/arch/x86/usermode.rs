//! Ring0 -> Ring3 transition.
//!
//! `enter_usermode` builds an `iret` frame and never returns to its caller;
//! it is reached once per process, from the tail of the kernel-thread
//! trampoline a freshly created process's [`crate::arch::x86::context::Context`]
//! points at (see `process::lifecycle`). Getting back into the kernel from
//! user mode afterward always happens through the `int 0x80` syscall gate or
//! a hardware interrupt, never by "returning" from this function.

use core::arch::asm;

use crate::arch::x86::gdt::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};

/// RFLAGS with the interrupt flag set and the mandatory reserved bit 1.
const USER_RFLAGS: u32 = 0x202;

/// Transition the current CPU to Ring 3.
///
/// # Safety
/// - `entry_point` must be a mapped, user-accessible, executable address.
/// - `user_stack` must be a mapped, user-accessible, writable address, and
///   should be 16-byte aligned per the SysV i386 ABI.
/// - CR3 must already hold a page directory with both the kernel mappings
///   (so the `iret` instruction stream itself stays mapped) and the
///   process's user mappings.
/// - The TSS's ESP0 must already point at this thread's kernel stack (see
///   `gdt::set_kernel_stack`), or the next interrupt/exception taken from
///   Ring 3 will load garbage.
pub unsafe fn enter_usermode(entry_point: u32, user_stack: u32) -> ! {
    // SAFETY: builds the iret frame (EIP, CS, EFLAGS, ESP, SS) on the
    // current kernel stack and sets the data segment registers to the user
    // selector; the caller's contract above covers the rest.
    unsafe {
        asm!(
            "mov ax, {user_ss:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "push {user_ss:e}",
            "push {user_stack:e}",
            "push {rflags:e}",
            "push {user_cs:e}",
            "push {entry:e}",
            "iretd",
            user_ss = in(reg) USER_DATA_SELECTOR as u32,
            user_stack = in(reg) user_stack,
            rflags = in(reg) USER_RFLAGS,
            user_cs = in(reg) USER_CODE_SELECTOR as u32,
            entry = in(reg) entry_point,
            options(noreturn),
        );
    }
}

//! Signal delivery to user-space signal handlers
//!
//! When a signal becomes pending for a process and the signal has a registered
//! handler (not SIG_DFL or SIG_IGN), the kernel must arrange for the handler to
//! execute in user space:
//!
//! 1. **Delivery** (`deliver_signal`): Saves the thread's current instruction
//!    and stack pointers into a signal frame on the user stack, sets up a
//!    trampoline return address that will invoke `sigreturn`, and redirects
//!    execution to the signal handler.
//!
//! 2. **Restoration** (`restore_signal_frame`): Called from `sys_sigreturn` to
//!    read the saved signal frame from the user stack and resume execution at
//!    the point where the signal interrupted the thread.
//!
//! # Signal Nesting
//!
//! Nested signals are supported. When a signal is delivered, the delivered
//! signal number is added to the process's blocked signal mask. This prevents
//! the same signal from interrupting its own handler. Different signals that
//! are not blocked can still be delivered during handler execution, producing
//! a nested signal frame on the user stack.
//!
//! Note: SIGKILL (9) and SIGSTOP (19) can never be blocked, caught, or
//! ignored -- `Process::set_signal_mask` enforces this invariant.

#[allow(unused_imports)]
use crate::{
    error::KernelError,
    println,
    process::{pcb::Process, thread::Thread},
};

/// Syscall number for SIG_RETURN (must match `Syscall::SigReturn`).
const SYS_SIGRETURN: u32 = 83;

/// Signal handler value indicating default action.
const SIG_DFL: usize = 0;
/// Signal handler value indicating the signal should be ignored.
const SIG_IGN: usize = 1;

/// Saved thread state pushed onto the user stack during signal delivery.
///
/// The i686 thread context abstraction ([`crate::arch::context::ThreadContext`])
/// only exposes the instruction pointer and stack pointer directly -- unlike a
/// full trap frame, it doesn't give the kernel the general-purpose register
/// file at the moment of interruption. The frame below saves what is
/// available and restorable through that abstraction: where execution should
/// resume, and the signal mask to restore.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SignalFrame {
    /// Address of the sigreturn trampoline code placed just after this struct.
    pub trampoline_ret_addr: u32,
    /// Signal number that caused this delivery.
    pub signum: u32,
    /// The process signal mask at the time of delivery (restored on sigreturn).
    pub saved_mask: u64,
    /// Instruction pointer the thread was executing at when the signal hit.
    pub saved_ip: u32,
    /// Stack pointer the thread was executing on when the signal hit.
    pub saved_sp: u32,
}

const SIGNAL_FRAME_SIZE: usize = core::mem::size_of::<SignalFrame>();

/// i686 sigreturn trampoline machine code.
///
/// Written onto the user stack just above the signal frame. When the signal
/// handler returns, it executes this trampoline, which calls
/// `syscall(SYS_SIGRETURN, frame_ptr)`.
///
/// Assembly (cdecl, int 0x80 syscall convention: eax=number, ebx=arg0):
/// ```text
///   lea ebx, [esp]        ; frame_ptr = current ESP (points to SignalFrame)
///   mov eax, SYS_SIGRETURN
///   int 0x80
///   ud2                    ; should never reach here
/// ```
const SIGRETURN_TRAMPOLINE: [u8; 12] = [
    0x8d, 0x1c, 0x24, // lea ebx, [esp]
    0xb8, 0x53, 0x00, 0x00, 0x00, // mov eax, 83 (SYS_SIGRETURN)
    0xcd, 0x80, // int 0x80
    0x0f, 0x0b, // ud2
];

const TRAMPOLINE_SIZE: usize = SIGRETURN_TRAMPOLINE.len();

// ============================================================================
// Physical memory write/read helpers (same pattern as creation.rs)
// ============================================================================

/// Write a byte slice to a user-space address via the physical memory window.
///
/// # Safety
///
/// `vaddr` must be a valid mapped address in the process's VAS with write
/// permissions, and `[vaddr, vaddr+data.len())` must lie within a single
/// mapped page.
#[cfg(feature = "alloc")]
unsafe fn write_bytes_to_user_stack(
    memory_space: &crate::mm::VirtualAddressSpace,
    vaddr: usize,
    data: &[u8],
) {
    use crate::mm::VirtualAddress;

    let pt_root = memory_space.get_page_table();
    if pt_root == 0 {
        return;
    }

    let mapper = unsafe { crate::mm::vas::create_mapper_from_root_pub(pt_root) };
    if let Ok((frame, _flags)) = mapper.translate_page(VirtualAddress(vaddr as u64)) {
        let page_offset = vaddr & 0xFFF;
        let phys_addr = (frame.as_u64() << 12) + page_offset as u64;
        // SAFETY: phys_addr is converted to a kernel-accessible virtual
        // address via phys_to_virt_addr.
        unsafe {
            let virt = crate::mm::phys_to_virt_addr(phys_addr);
            core::ptr::copy_nonoverlapping(data.as_ptr(), virt as *mut u8, data.len());
        }
    }
}

/// Read a byte slice from a user-space address via the physical memory window.
///
/// # Safety
///
/// `vaddr` must be a valid mapped address, and `[vaddr, vaddr+buf.len())` must
/// lie within a single mapped page.
#[cfg(feature = "alloc")]
unsafe fn read_bytes_from_user_stack(
    memory_space: &crate::mm::VirtualAddressSpace,
    vaddr: usize,
    buf: &mut [u8],
) -> bool {
    use crate::mm::VirtualAddress;

    let pt_root = memory_space.get_page_table();
    if pt_root == 0 {
        return false;
    }

    let mapper = unsafe { crate::mm::vas::create_mapper_from_root_pub(pt_root) };
    if let Ok((frame, _flags)) = mapper.translate_page(VirtualAddress(vaddr as u64)) {
        let page_offset = vaddr & 0xFFF;
        let phys_addr = (frame.as_u64() << 12) + page_offset as u64;
        // SAFETY: phys_addr is converted to a kernel-accessible virtual
        // address via phys_to_virt_addr.
        unsafe {
            let virt = crate::mm::phys_to_virt_addr(phys_addr);
            core::ptr::copy_nonoverlapping(virt as *const u8, buf.as_mut_ptr(), buf.len());
        }
        true
    } else {
        false
    }
}

// ============================================================================
// Signal delivery
// ============================================================================

/// Deliver a signal to a user-space handler by constructing a signal frame on
/// the user stack.
///
/// On success, the next time this thread returns to user space it will
/// execute the signal handler. When the handler returns, the trampoline
/// calls `sigreturn`, which restores the original context.
///
/// # Returns
/// - `Ok(true)` if a signal frame was constructed and the handler will run.
/// - `Ok(false)` if the signal was handled in-kernel (default/ignore).
/// - `Err(...)` on failure (invalid signal, no mapped stack, etc.).
#[cfg(feature = "alloc")]
pub fn deliver_signal(
    process: &Process,
    thread: &Thread,
    signum: usize,
) -> Result<bool, KernelError> {
    use crate::arch::context::ThreadContext;

    if signum == 0 || signum > 31 {
        return Err(KernelError::InvalidArgument {
            name: "signum",
            value: "signal number out of range (1-31)",
        });
    }

    let handler = process.get_signal_handler(signum).unwrap_or(SIG_DFL);

    if handler == SIG_DFL {
        // Default action: for most signals, terminate the process. Leave
        // that decision to the caller (sched::dispatch_signal); just log and
        // report that no handler ran.
        println!(
            "[SIGNAL] Signal {} for process {}: default action",
            signum, process.pid.0
        );
        return Ok(false);
    }

    if handler == SIG_IGN {
        process.clear_pending_signal(signum);
        return Ok(false);
    }

    let memory_space = process.memory_space.lock();
    let mut ctx = thread.context.lock();

    let saved_ip = ctx.get_instruction_pointer() as u32;
    let saved_sp = ctx.get_stack_pointer() as u32;

    let saved_mask = process.get_signal_mask();
    process.set_signal_mask(saved_mask | (1u64 << signum));
    process.clear_pending_signal(signum);

    // User stack grows downward from saved_sp.
    let mut sp = saved_sp as usize;

    sp -= TRAMPOLINE_SIZE;
    sp &= !1;
    let trampoline_addr = sp;

    // SAFETY: sp is within the user stack region and mapped in the
    // process's page tables.
    unsafe {
        write_bytes_to_user_stack(&memory_space, trampoline_addr, &SIGRETURN_TRAMPOLINE);
    }

    sp -= SIGNAL_FRAME_SIZE;
    sp &= !0xF;
    let frame_addr = sp;

    let frame = SignalFrame {
        trampoline_ret_addr: trampoline_addr as u32,
        signum: signum as u32,
        saved_mask,
        saved_ip,
        saved_sp,
    };

    // SAFETY: frame_addr is within the user stack and mapped in the
    // process's page tables; we write the whole SignalFrame as bytes.
    unsafe {
        let frame_bytes = core::slice::from_raw_parts(
            &frame as *const SignalFrame as *const u8,
            SIGNAL_FRAME_SIZE,
        );
        write_bytes_to_user_stack(&memory_space, frame_addr, frame_bytes);
    }

    ctx.set_instruction_pointer(handler);
    ctx.set_stack_pointer(frame_addr);
    ctx.set_return_value(signum);

    println!(
        "[SIGNAL] Delivered signal {} to process {} handler {:#x}, frame at {:#x}",
        signum, process.pid.0, handler, frame_addr
    );

    Ok(true)
}

#[cfg(not(feature = "alloc"))]
pub fn deliver_signal(
    _process: &Process,
    _thread: &Thread,
    _signum: usize,
) -> Result<bool, KernelError> {
    Err(KernelError::NotImplemented {
        feature: "signal delivery (requires alloc)",
    })
}

// ============================================================================
// Signal frame restoration (sigreturn)
// ============================================================================

/// Restore the original thread context from a signal frame on the user stack.
///
/// Called by `sys_sigreturn` after the signal handler returns. Reads the
/// [`SignalFrame`] from the user stack and restores the instruction pointer,
/// stack pointer, and signal mask.
#[cfg(feature = "alloc")]
pub fn restore_signal_frame(
    process: &Process,
    thread: &Thread,
    frame_ptr: usize,
) -> Result<(), KernelError> {
    use crate::arch::context::ThreadContext;

    let memory_space = process.memory_space.lock();

    let mut frame_bytes = [0u8; SIGNAL_FRAME_SIZE];
    // SAFETY: frame_ptr was passed from the trampoline and points to a
    // SignalFrame we previously wrote.
    let ok = unsafe { read_bytes_from_user_stack(&memory_space, frame_ptr, &mut frame_bytes) };

    if !ok {
        return Err(KernelError::InvalidArgument {
            name: "frame_ptr",
            value: "could not read signal frame from user stack",
        });
    }

    // SAFETY: frame_bytes holds exactly SIGNAL_FRAME_SIZE bytes read from
    // the user stack; the struct is repr(C) with plain integer fields, so
    // any bit pattern is valid.
    let frame: SignalFrame = unsafe { core::ptr::read(frame_bytes.as_ptr() as *const SignalFrame) };

    {
        let mut ctx = thread.context.lock();
        ctx.set_instruction_pointer(frame.saved_ip as usize);
        ctx.set_stack_pointer(frame.saved_sp as usize);
    }

    process.set_signal_mask(frame.saved_mask);

    println!(
        "[SIGNAL] Restored signal frame for process {}, resuming at {:#x}",
        process.pid.0, frame.saved_ip
    );

    Ok(())
}

#[cfg(not(feature = "alloc"))]
pub fn restore_signal_frame(
    _process: &Process,
    _thread: &Thread,
    _frame_ptr: usize,
) -> Result<(), KernelError> {
    Err(KernelError::NotImplemented {
        feature: "signal frame restore (requires alloc)",
    })
}

// ============================================================================
// Pending signal check (called from syscall return path)
// ============================================================================

/// Check for and deliver any pending signals on the current process/thread.
///
/// Called on the syscall return path to deliver signals at a safe point. It
/// dequeues the lowest-numbered pending unblocked signal and, if a user-space
/// handler is registered, constructs a signal frame so the handler executes
/// on return to user mode.
#[cfg(feature = "alloc")]
pub fn check_pending_signals() -> Result<bool, KernelError> {
    let process =
        crate::process::current_process().ok_or(KernelError::ProcessNotFound { pid: 0 })?;
    let thread = crate::process::current_thread().ok_or(KernelError::ThreadNotFound { tid: 0 })?;

    if let Some(signum) = process.get_next_pending_signal() {
        let mask = process.get_signal_mask();
        if mask & (1u64 << signum) != 0 {
            // Blocked: leave it pending.
            return Ok(false);
        }
        deliver_signal(process, thread, signum)
    } else {
        Ok(false)
    }
}

#[cfg(not(feature = "alloc"))]
pub fn check_pending_signals() -> Result<bool, KernelError> {
    Ok(false)
}

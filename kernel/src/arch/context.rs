//! Re-exports of the i686 context-switch primitives under a stable path so
//! the scheduler calls `crate::arch::context::*` rather than reaching past
//! the architecture boundary into `arch::x86` directly.

pub use crate::arch::x86::context::{switch_to, AddressSpaceId, Context};

/// Initialize FPU/SSE for the current CPU.
pub fn init_fpu() {
    crate::arch::x86::fpu::init();
}

/// Save FPU/SSE state into a 512-byte `FXSAVE` image.
pub fn save_fpu_state(state: &mut crate::arch::x86::fpu::FpuState) {
    crate::arch::x86::fpu::save(state);
}

/// Restore FPU/SSE state from a 512-byte `FXSAVE` image.
pub fn restore_fpu_state(state: &crate::arch::x86::fpu::FpuState) {
    crate::arch::x86::fpu::restore(state);
}

/// A thread's full context: the callee-saved kernel register set
/// [`switch_to`] operates on, plus the ring-3 entry point and user stack a
/// freshly built thread resumes into the first time it is scheduled.
///
/// Two layers exist because they change on different events. `kernel`
/// only ever changes as a side effect of `switch_to` itself; `entry_point`/
/// `user_stack`/`tls_base` change on `exec()`, which replaces a thread's
/// program without touching its kernel stack allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchThreadContext {
    kernel: Context,
    entry_point: usize,
    user_stack: usize,
    kernel_stack_top: usize,
    tls_base: u64,
    return_value: usize,
}

/// Accessors every caller outside `arch` uses to read or rewrite a thread's
/// entry state, independent of the underlying architecture's register
/// layout.
pub trait ThreadContext {
    fn new() -> Self;
    /// Lay out the initial context for a thread that has never run: its
    /// first `switch_to` lands in [`user_entry_trampoline`], which reads
    /// `entry_point`/`user_stack` back out and transitions to ring 3.
    fn init(&mut self, entry_point: usize, user_stack_top: usize, kernel_stack_top: usize);
    fn get_instruction_pointer(&self) -> usize;
    fn set_instruction_pointer(&mut self, ip: usize);
    fn get_stack_pointer(&self) -> usize;
    fn set_stack_pointer(&mut self, sp: usize);
    fn set_return_value(&mut self, value: usize);
    fn set_tls_base(&mut self, base: u64);
    /// The low-level register context [`switch_to`] actually saves/restores.
    fn kernel_context(&self) -> &Context;
    /// Mutable access to the same context, for the scheduler to write the
    /// outgoing task's saved registers into after a switch returns into it.
    fn kernel_context_mut(&mut self) -> &mut Context;
}

impl ThreadContext for ArchThreadContext {
    fn new() -> Self {
        Self::default()
    }

    fn init(&mut self, entry_point: usize, user_stack_top: usize, kernel_stack_top: usize) {
        self.entry_point = entry_point;
        self.user_stack = user_stack_top;
        self.kernel_stack_top = kernel_stack_top;
        self.kernel = Context::new(kernel_stack_top as u32, user_entry_trampoline, 0);
    }

    fn get_instruction_pointer(&self) -> usize {
        self.entry_point
    }

    fn set_instruction_pointer(&mut self, ip: usize) {
        self.entry_point = ip;
        if self.kernel_stack_top != 0 {
            self.kernel = Context::new(self.kernel_stack_top as u32, user_entry_trampoline, 0);
        }
    }

    fn get_stack_pointer(&self) -> usize {
        self.user_stack
    }

    fn set_stack_pointer(&mut self, sp: usize) {
        self.user_stack = sp;
    }

    fn set_return_value(&mut self, value: usize) {
        self.return_value = value;
    }

    fn set_tls_base(&mut self, base: u64) {
        self.tls_base = base;
    }

    fn kernel_context(&self) -> &Context {
        &self.kernel
    }

    fn kernel_context_mut(&mut self) -> &mut Context {
        &mut self.kernel
    }
}

/// Reached once, the first time the scheduler switches into a brand-new
/// thread's kernel stack. Looks up the current thread's entry point/user
/// stack (set by `ThreadContext::init`/`exec`) and transitions to ring 3.
/// Never returns: control leaves the kernel via `iret` and only re-enters
/// through the syscall gate or a hardware interrupt.
extern "C" fn user_entry_trampoline(_arg: usize) -> ! {
    let thread = crate::process::current_thread().expect("no current thread at first switch-in");
    let (entry, stack, tls_base) = {
        let ctx = thread.context.lock();
        (
            ctx.entry_point as u32,
            ctx.user_stack as u32,
            ctx.tls_base,
        )
    };
    crate::arch::x86::gdt::set_kernel_stack(thread.kernel_stack.top() as u32);
    let _ = tls_base; // TLS segment activation is not wired up on i686 yet.
    // SAFETY: `entry`/`stack` were validated when the thread's address
    // space was built (process::lifecycle); the kernel stack was just
    // installed into the TSS above.
    unsafe { crate::arch::x86::usermode::enter_usermode(entry, stack) }
}

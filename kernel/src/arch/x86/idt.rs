// Interrupt Descriptor Table
//
// Raw 256-entry i686 IDT. `x86-interrupt` is a stable calling convention on
// i686 as well as x86_64, so handlers are still plain Rust functions; only
// the descriptor encoding and `lidt` plumbing are hand-rolled here since the
// old 64-bit-only `x86_64::structures::idt` wrapper no longer applies.

use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch::x86::gdt::KERNEL_CODE_SELECTOR;
use crate::irq::IrqNumber;

/// First vector used for remapped legacy IRQs (see `arch::x86::pic`).
pub const IRQ_BASE: u8 = 32;
/// Software interrupt vector used for the syscall gate (`int 0x80`).
pub const SYSCALL_VECTOR: u8 = 0x80;
/// Vector the Local APIC timer is programmed to raise.
pub const APIC_TIMER_VECTOR: u8 = 48;
/// Spurious interrupt vector (must have low 4 bits set, conventionally 0xFF).
pub const SPURIOUS_VECTOR: u8 = 0xFF;

const IDT_ENTRIES: usize = 256;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

/// Present, ring 0, 32-bit interrupt gate (clears IF on entry).
const GATE_INTERRUPT: u8 = 0x8E;
/// Present, ring 3, 32-bit interrupt gate -- used only for the `int 0x80` syscall vector.
const GATE_SYSCALL: u8 = 0xEE;

#[repr(C, align(8))]
struct IdtTable([IdtEntry; IDT_ENTRIES]);

lazy_static! {
    static ref IDT: Mutex<IdtTable> = Mutex::new(IdtTable([IdtEntry::missing(); IDT_ENTRIES]));
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

/// Build the IDT and load it with `lidt`.
pub fn init() {
    {
        let mut idt = IDT.lock();
        macro_rules! set {
            ($vector:expr, $handler:expr) => {
                idt.0[$vector as usize] =
                    IdtEntry::new($handler as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT);
            };
        }

        set!(0, divide_error);
        set!(1, debug_exception);
        set!(2, nmi);
        set!(3, breakpoint);
        set!(4, overflow);
        set!(5, bound_range_exceeded);
        set!(6, invalid_opcode);
        set!(7, device_not_available);
        set!(8, double_fault);
        set!(10, invalid_tss);
        set!(11, segment_not_present);
        set!(12, stack_segment_fault);
        set!(13, general_protection_fault);
        set!(14, page_fault);
        set!(16, x87_floating_point);
        set!(17, alignment_check);
        set!(18, machine_check);
        set!(19, simd_floating_point);

        for vector in 0..16u8 {
            let offset = IRQ_BASE + vector;
            idt.0[offset as usize] =
                IdtEntry::new(IRQ_THUNKS[vector as usize] as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT);
        }

        idt.0[APIC_TIMER_VECTOR as usize] =
            IdtEntry::new(apic_timer_interrupt as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT);
        idt.0[SPURIOUS_VECTOR as usize] =
            IdtEntry::new(spurious_interrupt as u32, KERNEL_CODE_SELECTOR, GATE_INTERRUPT);
        idt.0[SYSCALL_VECTOR as usize] =
            IdtEntry::new(syscall_gate as u32, KERNEL_CODE_SELECTOR, GATE_SYSCALL);
    }

    let idt_ptr = {
        let idt = IDT.lock();
        IdtPointer {
            limit: (size_of::<IdtTable>() - 1) as u16,
            base: &idt.0 as *const _ as u32,
        }
    };

    // SAFETY: `idt_ptr` points at the table above, which outlives the kernel.
    unsafe {
        core::arch::asm!("lidt [{0}]", in(reg) &idt_ptr, options(readonly, nostack));
    }
}

// ---------------------------------------------------------------------------
// CPU exception handlers
// ---------------------------------------------------------------------------

extern "x86-interrupt" fn divide_error() {
    panic!("EXCEPTION: DIVIDE ERROR");
}

extern "x86-interrupt" fn debug_exception() {
    crate::println!("EXCEPTION: DEBUG");
}

extern "x86-interrupt" fn nmi() {
    crate::println!("EXCEPTION: NON-MASKABLE INTERRUPT");
}

extern "x86-interrupt" fn breakpoint() {
    crate::println!("EXCEPTION: BREAKPOINT");
}

extern "x86-interrupt" fn overflow() {
    crate::println!("EXCEPTION: OVERFLOW");
}

extern "x86-interrupt" fn bound_range_exceeded() {
    panic!("EXCEPTION: BOUND RANGE EXCEEDED");
}

extern "x86-interrupt" fn invalid_opcode() {
    panic!("EXCEPTION: INVALID OPCODE");
}

extern "x86-interrupt" fn device_not_available() {
    panic!("EXCEPTION: DEVICE NOT AVAILABLE (FPU used without lazy-restore support)");
}

extern "x86-interrupt" fn double_fault(error_code: u32) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT (error code {error_code:#x})");
}

extern "x86-interrupt" fn invalid_tss(error_code: u32) {
    panic!("EXCEPTION: INVALID TSS (selector {error_code:#x})");
}

extern "x86-interrupt" fn segment_not_present(error_code: u32) {
    panic!("EXCEPTION: SEGMENT NOT PRESENT (selector {error_code:#x})");
}

extern "x86-interrupt" fn stack_segment_fault(error_code: u32) {
    panic!("EXCEPTION: STACK SEGMENT FAULT (selector {error_code:#x})");
}

extern "x86-interrupt" fn general_protection_fault(error_code: u32) {
    panic!("EXCEPTION: GENERAL PROTECTION FAULT (error code {error_code:#x})");
}

extern "x86-interrupt" fn page_fault(error_code: u32) {
    let fault_addr: u32;
    // SAFETY: CR2 holds the faulting linear address; reading it is side-effect free.
    unsafe {
        core::arch::asm!("mov {0}, cr2", out(reg) fault_addr, options(nomem, nostack));
    }
    crate::mm::page_fault::handle(fault_addr as usize, error_code);
}

extern "x86-interrupt" fn x87_floating_point() {
    panic!("EXCEPTION: X87 FLOATING POINT");
}

extern "x86-interrupt" fn alignment_check(error_code: u32) {
    panic!("EXCEPTION: ALIGNMENT CHECK (error code {error_code:#x})");
}

extern "x86-interrupt" fn machine_check() -> ! {
    panic!("EXCEPTION: MACHINE CHECK");
}

extern "x86-interrupt" fn simd_floating_point() {
    panic!("EXCEPTION: SIMD FLOATING POINT");
}

// ---------------------------------------------------------------------------
// IRQ handlers (legacy PIC vectors 32-47) and APIC timer/spurious vectors
// ---------------------------------------------------------------------------

macro_rules! irq_handler {
    ($name:ident, $irq:expr) => {
        extern "x86-interrupt" fn $name() {
            crate::irq::dispatch(IrqNumber::new($irq));
        }
    };
}

irq_handler!(irq0, 0);
irq_handler!(irq1, 1);
irq_handler!(irq2, 2);
irq_handler!(irq3, 3);
irq_handler!(irq4, 4);
irq_handler!(irq5, 5);
irq_handler!(irq6, 6);
irq_handler!(irq7, 7);
irq_handler!(irq8, 8);
irq_handler!(irq9, 9);
irq_handler!(irq10, 10);
irq_handler!(irq11, 11);
irq_handler!(irq12, 12);
irq_handler!(irq13, 13);
irq_handler!(irq14, 14);
irq_handler!(irq15, 15);

static IRQ_THUNKS: [extern "x86-interrupt" fn(); 16] = [
    irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12, irq13,
    irq14, irq15,
];

/// Interval the Local APIC timer is programmed for (see
/// `arch::x86::apic::setup_timer` in `bootstrap::boot`). Kept here, next to
/// the handler that consumes it, rather than in `apic.rs`, since the divide/
/// count values are derived from it at setup time but the handler only ever
/// needs the millisecond figure.
pub const TIMER_TICK_MS: u64 = 10;

extern "x86-interrupt" fn apic_timer_interrupt() {
    crate::timer::timer_tick(TIMER_TICK_MS);
    crate::sched::tick();
    crate::arch::x86::apic::send_eoi();
}

extern "x86-interrupt" fn spurious_interrupt() {
    // No EOI: by definition a spurious vector was never actually delivered.
}

// ---------------------------------------------------------------------------
// Syscall gate
// ---------------------------------------------------------------------------

/// `int 0x80` entry point. Register convention: EAX = syscall number,
/// EBX/ECX/EDX/ESI/EDI = args 1-5. Return value comes back in EAX.
///
/// This trampoline only exists to bridge the interrupt ABI to the plain
/// `extern "C"` dispatcher in [`crate::syscall`]; it does not use
/// `x86-interrupt` because that ABI does not expose the general-purpose
/// registers the syscall convention needs.
#[naked]
extern "C" fn syscall_gate() {
    // SAFETY: naked function; prologue/epilogue are hand-written. Pushes the
    // five argument registers and EAX in the order `syscall_dispatch` expects,
    // calls it, writes the result back into EAX for `iretd`, then restores
    // the caller's registers before returning from the interrupt.
    unsafe {
        core::arch::naked_asm!(
            "push edi",
            "push esi",
            "push edx",
            "push ecx",
            "push ebx",
            "push eax",
            "call {dispatch}",
            "add esp, 24",
            "iretd",
            dispatch = sym syscall_dispatch,
        );
    }
}

extern "C" fn syscall_dispatch(num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32 {
    crate::syscall::syscall_handler(num as usize, a1 as usize, a2 as usize, a3 as usize, a4 as usize, a5 as usize)
        as i32
}

// Global Descriptor Table
//
// i686 has no crate equivalent of `x86_64::structures::gdt` in this stack, so
// the table and its descriptors are hand-rolled here: flat 4GiB code/data
// segments for ring 0 and ring 3, plus a TSS used only to hold ESP0/SS0 for
// the ring3 -> ring0 stack switch on interrupt/exception entry.

use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

/// Kernel code segment selector (ring 0).
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
/// Kernel data segment selector (ring 0).
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
/// User code segment selector (ring 3, RPL bits already set).
pub const USER_CODE_SELECTOR: u16 = 0x18 | 3;
/// User data segment selector (ring 3, RPL bits already set).
pub const USER_DATA_SELECTOR: u16 = 0x20 | 3;
/// TSS selector.
pub const TSS_SELECTOR: u16 = 0x28;
/// Per-thread TLS segment selector (ring 3), loaded into FS by user code.
/// Its base is rewritten per-thread by [`set_tls_base`]; i686 has no
/// FS-base MSR the way x86_64 does, so thread-local storage addressing
/// goes through this descriptor instead.
pub const USER_TLS_SELECTOR: u16 = 0x30 | 3;

const GDT_ENTRIES: usize = 7;

/// A single raw 8-byte GDT descriptor.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    /// Build a flat segment descriptor covering the full 4GiB address space.
    const fn flat(access: u8, flags_4k_32bit: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            granularity: 0xF0 | (flags_4k_32bit & 0x0F),
            base_high: 0,
        }
    }

    /// Build a flat 4GiB data segment descriptor with an explicit base,
    /// used for the per-thread TLS segment whose base changes on every
    /// context switch.
    const fn flat_with_base(base: u32, access: u8, flags_4k_32bit: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: 0xF0 | (flags_4k_32bit & 0x0F),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    fn set_base(&mut self, base: u32) {
        self.base_low = (base & 0xFFFF) as u16;
        self.base_mid = ((base >> 16) & 0xFF) as u8;
        self.base_high = ((base >> 24) & 0xFF) as u8;
    }

    /// Build a system descriptor (used for the TSS) pointing at `base` with
    /// byte-granular `limit`.
    fn system(base: u32, limit: u32, access: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | 0x00,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

mod access {
    pub const PRESENT: u8 = 1 << 7;
    pub const RING3: u8 = 3 << 5;
    pub const DESCRIPTOR_TYPE: u8 = 1 << 4; // code/data, not system
    pub const EXECUTABLE: u8 = 1 << 3;
    pub const READ_WRITE: u8 = 1 << 1;
    pub const TSS_AVAILABLE: u8 = 0x09;
}

/// 32-bit Task State Segment (Intel SDM Vol 3A, 7.2.1).
///
/// Only `esp0`/`ss0` are used in practice: they tell the CPU which stack to
/// switch to when an interrupt or exception is taken from ring 3.
#[repr(C, packed)]
pub struct Tss32 {
    link: u32,
    pub esp0: u32,
    pub ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl Tss32 {
    const fn new() -> Self {
        Self {
            link: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SELECTOR as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            // No I/O permission bitmap; point past the end of the segment.
            iomap_base: size_of::<Tss32>() as u16,
        }
    }
}

lazy_static! {
    static ref TSS: Mutex<Tss32> = Mutex::new(Tss32::new());
}

#[repr(C, align(8))]
struct GdtTable([GdtEntry; GDT_ENTRIES]);

lazy_static! {
    static ref GDT: Mutex<GdtTable> = Mutex::new(GdtTable([GdtEntry::null(); GDT_ENTRIES]));
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Load the GDT, reload segment registers, and load the task register.
///
/// # Safety
///
/// Must be called exactly once, early in boot, before any interrupt can
/// fire and before any ring-3 transition.
pub fn init() {
    {
        let mut gdt = GDT.lock();
        gdt.0[0] = GdtEntry::null();
        gdt.0[1] = GdtEntry::flat(
            access::PRESENT | access::DESCRIPTOR_TYPE | access::EXECUTABLE | access::READ_WRITE,
            0x0C,
        );
        gdt.0[2] = GdtEntry::flat(
            access::PRESENT | access::DESCRIPTOR_TYPE | access::READ_WRITE,
            0x0C,
        );
        gdt.0[3] = GdtEntry::flat(
            access::PRESENT | access::RING3 | access::DESCRIPTOR_TYPE | access::EXECUTABLE | access::READ_WRITE,
            0x0C,
        );
        gdt.0[4] = GdtEntry::flat(
            access::PRESENT | access::RING3 | access::DESCRIPTOR_TYPE | access::READ_WRITE,
            0x0C,
        );

        let tss_addr = &*TSS.lock() as *const Tss32 as u32;
        gdt.0[5] = GdtEntry::system(
            tss_addr,
            (size_of::<Tss32>() - 1) as u32,
            access::PRESENT | access::TSS_AVAILABLE,
        );

        gdt.0[6] = GdtEntry::flat_with_base(
            0,
            access::PRESENT | access::RING3 | access::DESCRIPTOR_TYPE | access::READ_WRITE,
            0x0C,
        );
    }

    let gdt_ptr = {
        let gdt = GDT.lock();
        GdtPointer {
            limit: (size_of::<GdtTable>() - 1) as u16,
            base: &gdt.0 as *const _ as u32,
        }
    };

    // SAFETY: `gdt_ptr` references the GDT we just built; it stays alive for
    // the kernel's lifetime behind `lazy_static`. Reloading every data
    // segment register and far-jumping into the new code selector is the
    // standard i686 GDT-switch sequence.
    unsafe {
        core::arch::asm!(
            "lgdt [{0}]",
            "mov ax, {1:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push {2:e}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            in(reg) &gdt_ptr,
            in(reg) KERNEL_DATA_SELECTOR as u32,
            in(reg) KERNEL_CODE_SELECTOR as u32,
            out("eax") _,
        );
        core::arch::asm!("ltr {0:x}", in(reg) TSS_SELECTOR, options(nostack, nomem));
    }
}

/// Update ESP0 in the TSS. Called by the scheduler before switching to a
/// task so the next ring3 -> ring0 transition lands on that task's kernel
/// stack.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}

/// Read the kernel stack pointer (ESP0) currently programmed in the TSS.
pub fn get_kernel_stack() -> u32 {
    TSS.lock().esp0
}

/// Rewrite the TLS segment's base to `base`. Called by the scheduler before
/// switching into a thread so that thread's `mov fs, ax`-then-TLS-relative
/// accesses resolve against its own TLS area.
pub fn set_tls_base(base: u32) {
    GDT.lock().0[6].set_base(base);
}

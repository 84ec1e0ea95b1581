//! PAE page table hierarchy: a 4-entry PDPT, each pointing at a 512-entry
//! page directory, each pointing at a 512-entry page table of 4 KiB leaves
//! (or a 2 MiB large-page leaf directly in the PD).
//!
//! There is a single hierarchy for the whole kernel (spec §4.3: process
//! "address spaces" are logical views into the same page tree), reached
//! through [`PageMapper`].

#![allow(dead_code)]

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::{
    frame_allocator::FrameAllocatorError, FrameNumber, PageFlags, PhysicalAddress, VirtualAddress,
    FRAME_ALLOCATOR,
};

const ENTRIES_PER_TABLE: usize = 512;
const ENTRIES_PER_PDPT: usize = 4;

#[derive(Clone, Copy)]
#[repr(transparent)]
struct RawEntry(u64);

const ENTRY_PRESENT: u64 = 1 << 0;
const ENTRY_WRITABLE: u64 = 1 << 1;
const ENTRY_USER: u64 = 1 << 2;
const ENTRY_WRITE_THROUGH: u64 = 1 << 3;
const ENTRY_NO_CACHE: u64 = 1 << 4;
const ENTRY_HUGE: u64 = 1 << 7;
const ENTRY_GLOBAL: u64 = 1 << 8;
const ENTRY_NX: u64 = 1 << 63;
const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

impl RawEntry {
    const fn empty() -> Self {
        Self(0)
    }

    fn is_present(self) -> bool {
        self.0 & ENTRY_PRESENT != 0
    }

    fn is_huge(self) -> bool {
        self.0 & ENTRY_HUGE != 0
    }

    fn is_user(self) -> bool {
        self.0 & ENTRY_USER != 0
    }

    fn addr(self) -> PhysicalAddress {
        PhysicalAddress((self.0 & ADDR_MASK) as u32)
    }

    fn new(addr: PhysicalAddress, flags: PageFlags, nx_supported: bool) -> Self {
        let mut bits = addr.0 as u64 & ADDR_MASK;
        if flags.contains(PageFlags::PRESENT) {
            bits |= ENTRY_PRESENT;
        }
        if flags.contains(PageFlags::WRITABLE) {
            bits |= ENTRY_WRITABLE;
        }
        if flags.contains(PageFlags::USER) {
            bits |= ENTRY_USER;
        }
        if flags.contains(PageFlags::WRITE_THROUGH) {
            bits |= ENTRY_WRITE_THROUGH;
        }
        if flags.contains(PageFlags::NO_CACHE) {
            bits |= ENTRY_NO_CACHE;
        }
        if flags.contains(PageFlags::HUGE) {
            bits |= ENTRY_HUGE;
        }
        if flags.contains(PageFlags::GLOBAL) {
            bits |= ENTRY_GLOBAL;
        }
        if nx_supported && flags.contains(PageFlags::NO_EXECUTE) {
            bits |= ENTRY_NX;
        }
        Self(bits)
    }
}

#[repr(C, align(4096))]
struct Table {
    entries: [RawEntry; ENTRIES_PER_TABLE],
}

impl Table {
    const fn empty() -> Self {
        Self {
            entries: [RawEntry::empty(); ENTRIES_PER_TABLE],
        }
    }
}

#[repr(C, align(32))]
struct Pdpt {
    entries: [RawEntry; ENTRIES_PER_PDPT],
}

impl Pdpt {
    const fn empty() -> Self {
        Self {
            entries: [RawEntry::empty(); ENTRIES_PER_PDPT],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableError {
    NotMapped,
    AlreadyMapped,
    Alloc(FrameAllocatorError),
}

impl From<FrameAllocatorError> for PageTableError {
    fn from(e: FrameAllocatorError) -> Self {
        Self::Alloc(e)
    }
}

/// Owns the single PDPT root for the kernel's one address space and backs
/// `map`/`unmap`/`protect`/`flush` (spec §4.3).
pub struct PageTableHierarchy {
    pdpt: *mut Pdpt,
    pdpt_phys: PhysicalAddress,
    nx_supported: bool,
}

// SAFETY: only reachable through `PageMapper`, which guards it with a
// `Mutex` at the call site.
unsafe impl Send for PageTableHierarchy {}

impl PageTableHierarchy {
    /// Allocates a fresh, empty PDPT. The kernel's identity-mapped window
    /// must already cover all frame-allocator-managed memory so that
    /// physical frame addresses can be dereferenced directly while building
    /// the hierarchy.
    pub fn new() -> Result<Self, PageTableError> {
        let frame = FRAME_ALLOCATOR.lock().alloc_frame()?;
        let phys = frame.address();
        let ptr = phys.0 as usize as *mut Pdpt;
        // SAFETY: `phys` was just allocated, is frame-aligned, identity
        // mapped, and large enough to hold a `Pdpt` (32 bytes).
        unsafe {
            ptr.write(Pdpt::empty());
        }
        Ok(Self {
            pdpt: ptr,
            pdpt_phys: phys,
            nx_supported: super::vmm::nx_supported(),
        })
    }

    pub fn cr3_value(&self) -> u32 {
        self.pdpt_phys.0
    }

    fn pdpt(&self) -> &Pdpt {
        // SAFETY: allocated in `new`, never freed while `self` is alive.
        unsafe { &*self.pdpt }
    }

    fn pdpt_mut(&mut self) -> &mut Pdpt {
        // SAFETY: see `pdpt`; `&mut self` guarantees exclusivity.
        unsafe { &mut *self.pdpt }
    }

    fn ensure_pd(&mut self, pdpt_index: usize) -> Result<*mut Table, PageTableError> {
        let entry = self.pdpt().entries[pdpt_index];
        if entry.is_present() {
            return Ok(entry.addr().0 as usize as *mut Table);
        }
        let frame = FRAME_ALLOCATOR.lock().alloc_frame()?;
        let phys = frame.address();
        let ptr = phys.0 as usize as *mut Table;
        // SAFETY: freshly allocated, identity-mapped frame.
        unsafe {
            ptr.write(Table::empty());
        }
        self.pdpt_mut().entries[pdpt_index] =
            RawEntry::new(phys, PageFlags::PRESENT | PageFlags::WRITABLE, false);
        Ok(ptr)
    }

    fn ensure_pt(&mut self, pd: *mut Table, pd_index: usize) -> Result<*mut Table, PageTableError> {
        // SAFETY: `pd` always comes from `ensure_pd`, a live identity-mapped
        // `Table`.
        let pd_ref = unsafe { &mut *pd };
        let entry = pd_ref.entries[pd_index];
        if entry.is_present() {
            if entry.is_huge() {
                return Err(PageTableError::AlreadyMapped);
            }
            return Ok(entry.addr().0 as usize as *mut Table);
        }
        let frame = FRAME_ALLOCATOR.lock().alloc_frame()?;
        let phys = frame.address();
        let ptr = phys.0 as usize as *mut Table;
        unsafe {
            ptr.write(Table::empty());
        }
        pd_ref.entries[pd_index] =
            RawEntry::new(phys, PageFlags::PRESENT | PageFlags::WRITABLE, false);
        Ok(ptr)
    }

    /// Maps a single 4 KiB page.
    pub fn map(&mut self, va: VirtualAddress, pa: PhysicalAddress, flags: PageFlags) -> Result<(), PageTableError> {
        let (pdpt_i, pd_i, pt_i) = va.pae_indices();
        let pd = self.ensure_pd(pdpt_i)?;
        let pt = self.ensure_pt(pd, pd_i)?;
        // SAFETY: `pt` is a live identity-mapped `Table` from `ensure_pt`.
        let pt_ref = unsafe { &mut *pt };
        if pt_ref.entries[pt_i].is_present() {
            return Err(PageTableError::AlreadyMapped);
        }
        pt_ref.entries[pt_i] = RawEntry::new(pa, flags, self.nx_supported);
        flush(va);
        Ok(())
    }

    /// Maps a 2 MiB large page directly in the page directory.
    pub fn map_large(&mut self, va: VirtualAddress, pa: PhysicalAddress, flags: PageFlags) -> Result<(), PageTableError> {
        let (pdpt_i, pd_i, _) = va.pae_indices();
        let pd = self.ensure_pd(pdpt_i)?;
        // SAFETY: `pd` is a live identity-mapped `Table` from `ensure_pd`.
        let pd_ref = unsafe { &mut *pd };
        if pd_ref.entries[pd_i].is_present() {
            return Err(PageTableError::AlreadyMapped);
        }
        pd_ref.entries[pd_i] = RawEntry::new(pa, flags | PageFlags::HUGE, self.nx_supported);
        flush(va);
        Ok(())
    }

    pub fn unmap(&mut self, va: VirtualAddress) -> Result<PhysicalAddress, PageTableError> {
        let (pdpt_i, pd_i, pt_i) = va.pae_indices();
        let pdpt_entry = self.pdpt().entries[pdpt_i];
        if !pdpt_entry.is_present() {
            return Err(PageTableError::NotMapped);
        }
        let pd = pdpt_entry.addr().0 as usize as *mut Table;
        // SAFETY: present PDPT entry always points at a live `Table`.
        let pd_ref = unsafe { &mut *pd };
        let pd_entry = pd_ref.entries[pd_i];
        if !pd_entry.is_present() {
            return Err(PageTableError::NotMapped);
        }
        if pd_entry.is_huge() {
            let phys = pd_entry.addr();
            pd_ref.entries[pd_i] = RawEntry::empty();
            flush(va);
            return Ok(phys);
        }
        let pt = pd_entry.addr().0 as usize as *mut Table;
        // SAFETY: present, non-huge PD entry always points at a live `Table`.
        let pt_ref = unsafe { &mut *pt };
        let pt_entry = pt_ref.entries[pt_i];
        if !pt_entry.is_present() {
            return Err(PageTableError::NotMapped);
        }
        let phys = pt_entry.addr();
        pt_ref.entries[pt_i] = RawEntry::empty();
        flush(va);
        Ok(phys)
    }

    pub fn protect(&mut self, va: VirtualAddress, new_flags: PageFlags) -> Result<(), PageTableError> {
        let (pdpt_i, pd_i, pt_i) = va.pae_indices();
        let pdpt_entry = self.pdpt().entries[pdpt_i];
        if !pdpt_entry.is_present() {
            return Err(PageTableError::NotMapped);
        }
        let pd = pdpt_entry.addr().0 as usize as *mut Table;
        // SAFETY: present PDPT entry always points at a live `Table`.
        let pd_ref = unsafe { &mut *pd };
        let pd_entry = pd_ref.entries[pd_i];
        if !pd_entry.is_present() {
            return Err(PageTableError::NotMapped);
        }
        if pd_entry.is_huge() {
            let phys = pd_entry.addr();
            pd_ref.entries[pd_i] =
                RawEntry::new(phys, new_flags | PageFlags::HUGE, self.nx_supported);
            flush(va);
            return Ok(());
        }
        let pt = pd_entry.addr().0 as usize as *mut Table;
        // SAFETY: present, non-huge PD entry always points at a live `Table`.
        let pt_ref = unsafe { &mut *pt };
        let pt_entry = pt_ref.entries[pt_i];
        if !pt_entry.is_present() {
            return Err(PageTableError::NotMapped);
        }
        let phys = pt_entry.addr();
        pt_ref.entries[pt_i] = RawEntry::new(phys, new_flags, self.nx_supported);
        flush(va);
        Ok(())
    }

    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (pdpt_i, pd_i, pt_i) = va.pae_indices();
        let pdpt_entry = self.pdpt().entries[pdpt_i];
        if !pdpt_entry.is_present() {
            return None;
        }
        let pd = pdpt_entry.addr().0 as usize as *const Table;
        // SAFETY: present PDPT entry always points at a live `Table`.
        let pd_ref = unsafe { &*pd };
        let pd_entry = pd_ref.entries[pd_i];
        if !pd_entry.is_present() {
            return None;
        }
        if pd_entry.is_huge() {
            return Some(PhysicalAddress(pd_entry.addr().0 | va.page_offset()));
        }
        let pt = pd_entry.addr().0 as usize as *const Table;
        // SAFETY: present, non-huge PD entry always points at a live `Table`.
        let pt_ref = unsafe { &*pt };
        let pt_entry = pt_ref.entries[pt_i];
        if !pt_entry.is_present() {
            return None;
        }
        Some(PhysicalAddress(pt_entry.addr().0 | va.page_offset()))
    }

    /// Whether `va` is mapped present with the USER bit set on its leaf
    /// entry, i.e. reachable from ring 3.
    pub fn is_user_mapped(&self, va: VirtualAddress) -> bool {
        let (pdpt_i, pd_i, pt_i) = va.pae_indices();
        let pdpt_entry = self.pdpt().entries[pdpt_i];
        if !pdpt_entry.is_present() {
            return false;
        }
        let pd = pdpt_entry.addr().0 as usize as *const Table;
        // SAFETY: present PDPT entry always points at a live `Table`.
        let pd_ref = unsafe { &*pd };
        let pd_entry = pd_ref.entries[pd_i];
        if !pd_entry.is_present() {
            return false;
        }
        if pd_entry.is_huge() {
            return pd_entry.is_user();
        }
        let pt = pd_entry.addr().0 as usize as *const Table;
        // SAFETY: present, non-huge PD entry always points at a live `Table`.
        let pt_ref = unsafe { &*pt };
        let pt_entry = pt_ref.entries[pt_i];
        pt_entry.is_present() && pt_entry.is_user()
    }
}

/// INVLPG for a single virtual address.
pub fn flush(va: VirtualAddress) {
    // SAFETY: invalidates one TLB entry; privileged, no other side effects.
    unsafe {
        core::arch::asm!("invlpg [{0:e}]", in(reg) va.0, options(nostack, preserves_flags));
    }
}

/// CR3 reload, invalidating all non-global TLB entries.
pub fn flush_all() {
    // SAFETY: round-trips CR3 through a register; privileged, no other side
    // effects beyond the TLB invalidation that reload implies.
    unsafe {
        let cr3: u32;
        core::arch::asm!("mov {0:e}, cr3", out(reg) cr3, options(nostack, preserves_flags));
        core::arch::asm!("mov cr3, {0:e}", in(reg) cr3, options(nostack, preserves_flags));
    }
}

static GENERATION: AtomicU32 = AtomicU32::new(0);

/// A lock-guarded handle to a [`PageTableHierarchy`] -- the unit the rest of
/// the kernel actually calls through.
pub struct PageMapper {
    hierarchy: Mutex<PageTableHierarchy>,
}

impl PageMapper {
    pub fn new(hierarchy: PageTableHierarchy) -> Self {
        GENERATION.fetch_add(1, Ordering::Relaxed);
        Self {
            hierarchy: Mutex::new(hierarchy),
        }
    }

    pub fn map(&self, va: VirtualAddress, pa: PhysicalAddress, flags: PageFlags) -> Result<(), PageTableError> {
        self.hierarchy.lock().map(va, pa, flags)
    }

    pub fn map_large(&self, va: VirtualAddress, pa: PhysicalAddress, flags: PageFlags) -> Result<(), PageTableError> {
        self.hierarchy.lock().map_large(va, pa, flags)
    }

    pub fn unmap(&self, va: VirtualAddress) -> Result<PhysicalAddress, PageTableError> {
        self.hierarchy.lock().unmap(va)
    }

    pub fn protect(&self, va: VirtualAddress, flags: PageFlags) -> Result<(), PageTableError> {
        self.hierarchy.lock().protect(va, flags)
    }

    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.hierarchy.lock().translate(va)
    }

    pub fn is_user_mapped(&self, va: VirtualAddress) -> bool {
        self.hierarchy.lock().is_user_mapped(va)
    }

    pub fn cr3_value(&self) -> u32 {
        self.hierarchy.lock().cr3_value()
    }
}

pub trait FrameAllocator {
    fn alloc(&mut self) -> Result<FrameNumber, FrameAllocatorError>;
}

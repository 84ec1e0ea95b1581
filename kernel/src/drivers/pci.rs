//! PCI bus enumeration.
//!
//! Scans every bus:device:function via the legacy CONFIG_ADDRESS/CONFIG_DATA
//! ports (0xCF8/0xCFC), reads BARs, and walks the capability list so drivers
//! can find their MSI/MSI-X capability without re-deriving the offset.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use spin::{Mutex, RwLock};

/// PCI configuration space register offsets (byte offsets into a function's
/// 256-byte config space).
#[repr(u16)]
#[allow(dead_code)]
pub enum PciConfigRegister {
    VendorId = 0x00,
    DeviceId = 0x02,
    Command = 0x04,
    Status = 0x06,
    RevisionId = 0x08,
    ProgIf = 0x09,
    Subclass = 0x0A,
    ClassCode = 0x0B,
    HeaderType = 0x0E,
    Bar0 = 0x10,
    CapabilitiesPointer = 0x34,
    InterruptLine = 0x3C,
    InterruptPin = 0x3D,
}

pub mod class_codes {
    pub const MASS_STORAGE: u8 = 0x01;
    pub const NETWORK: u8 = 0x02;
    pub const BRIDGE: u8 = 0x06;
}

pub mod command_flags {
    pub const IO_SPACE: u16 = 1 << 0;
    pub const MEMORY_SPACE: u16 = 1 << 1;
    pub const BUS_MASTER: u16 = 1 << 2;
}

/// MSI capability ID (PCI Local Bus spec §6.8.1).
pub const CAP_ID_MSI: u8 = 0x05;
/// MSI-X capability ID (PCI spec §6.8.2).
pub const CAP_ID_MSIX: u8 = 0x11;

/// bus:device:function address of a PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PciLocation {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciLocation {
    pub fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }

    fn config_address(&self) -> u32 {
        0x8000_0000
            | ((self.bus as u32) << 16)
            | ((self.device as u32) << 11)
            | ((self.function as u32) << 8)
    }
}

/// A decoded Base Address Register.
#[derive(Debug, Clone, Copy)]
pub enum PciBar {
    Memory {
        address: u64,
        size: u64,
        prefetchable: bool,
        is_64bit: bool,
    },
    Io {
        address: u32,
        size: u32,
    },
    None,
}

impl PciBar {
    pub fn memory_address(&self) -> Option<u64> {
        match self {
            Self::Memory { address, .. } => Some(*address),
            _ => None,
        }
    }

    pub fn io_address(&self) -> Option<u32> {
        match self {
            Self::Io { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// A single PCI capability list entry (offset into config space + ID).
#[derive(Debug, Clone, Copy)]
pub struct PciCapability {
    pub id: u8,
    pub offset: u8,
}

/// A discovered PCI function.
#[derive(Debug, Clone)]
pub struct PciDevice {
    pub location: PciLocation,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_code: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub revision: u8,
    pub header_type: u8,
    pub interrupt_line: u8,
    pub interrupt_pin: u8,
    pub bars: Vec<PciBar>,
    pub capabilities: Vec<PciCapability>,
}

impl PciDevice {
    fn new(location: PciLocation) -> Self {
        Self {
            location,
            vendor_id: 0,
            device_id: 0,
            class_code: 0,
            subclass: 0,
            prog_if: 0,
            revision: 0,
            header_type: 0,
            interrupt_line: 0,
            interrupt_pin: 0,
            bars: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn is_multifunction(&self) -> bool {
        self.header_type & 0x80 != 0
    }

    /// Find the first capability with the given ID (e.g. [`CAP_ID_MSI`]).
    pub fn find_capability(&self, id: u8) -> Option<&PciCapability> {
        self.capabilities.iter().find(|c| c.id == id)
    }
}

/// Raw config space accessors, usable without going through [`PciBus`]'s
/// device table (e.g. while still probing).
fn read_config_dword(location: PciLocation, offset: u16) -> u32 {
    let address = location.config_address() | (offset as u32 & 0xFC);
    // SAFETY: 0xCF8/0xCFC are the standard PCI configuration mechanism #1
    // ports, present on every PC-compatible chipset.
    unsafe {
        crate::arch::outl(0xCF8, address);
        crate::arch::inl(0xCFC)
    }
}

fn write_config_dword(location: PciLocation, offset: u16, value: u32) {
    let address = location.config_address() | (offset as u32 & 0xFC);
    // SAFETY: see `read_config_dword`.
    unsafe {
        crate::arch::outl(0xCF8, address);
        crate::arch::outl(0xCFC, value);
    }
}

fn read_config_byte(location: PciLocation, offset: u16) -> u8 {
    let dword = read_config_dword(location, offset & !3);
    ((dword >> ((offset & 3) * 8)) & 0xFF) as u8
}

fn read_config_word(location: PciLocation, offset: u16) -> u16 {
    let dword = read_config_dword(location, offset & !3);
    ((dword >> ((offset & 3) * 8)) & 0xFFFF) as u16
}

/// Read a config dword at an arbitrary location, for drivers that need to
/// poke vendor-specific registers (e.g. virtio's MSI-X table BAR index).
pub fn read_dword(location: PciLocation, offset: u16) -> u32 {
    read_config_dword(location, offset)
}

pub fn write_dword(location: PciLocation, offset: u16, value: u32) {
    write_config_dword(location, offset, value)
}

fn probe_device(location: PciLocation) -> Option<PciDevice> {
    let vendor_id = read_config_word(location, PciConfigRegister::VendorId as u16);
    if vendor_id == 0xFFFF {
        return None;
    }
    let mut device = PciDevice::new(location);
    device.vendor_id = vendor_id;
    device.device_id = read_config_word(location, PciConfigRegister::DeviceId as u16);
    Some(device)
}

fn read_device_config(device: &mut PciDevice) {
    let location = device.location;
    device.class_code = read_config_byte(location, PciConfigRegister::ClassCode as u16);
    device.subclass = read_config_byte(location, PciConfigRegister::Subclass as u16);
    device.prog_if = read_config_byte(location, PciConfigRegister::ProgIf as u16);
    device.revision = read_config_byte(location, PciConfigRegister::RevisionId as u16);
    device.header_type = read_config_byte(location, PciConfigRegister::HeaderType as u16);
    device.interrupt_line = read_config_byte(location, PciConfigRegister::InterruptLine as u16);
    device.interrupt_pin = read_config_byte(location, PciConfigRegister::InterruptPin as u16);
    device.bars = read_bars(location, device.header_type & 0x7F);

    let status = read_config_word(location, PciConfigRegister::Status as u16);
    if status & (1 << 4) != 0 {
        device.capabilities = walk_capabilities(location);
    }
}

/// Walk the capability linked list starting at the Capabilities Pointer.
fn walk_capabilities(location: PciLocation) -> Vec<PciCapability> {
    let mut caps = Vec::new();
    let mut ptr = read_config_byte(location, PciConfigRegister::CapabilitiesPointer as u16) & 0xFC;
    let mut guard = 0;
    while ptr != 0 && guard < 64 {
        let id = read_config_byte(location, ptr as u16);
        let next = read_config_byte(location, (ptr + 1) as u16) & 0xFC;
        caps.push(PciCapability { id, offset: ptr });
        ptr = next;
        guard += 1;
    }
    caps
}

fn read_bars(location: PciLocation, header_type: u8) -> Vec<PciBar> {
    let mut bars = Vec::new();
    let bar_count = if header_type == 0 { 6 } else { 2 };
    let mut i = 0;
    while i < bar_count {
        let bar_offset = PciConfigRegister::Bar0 as u16 + (i * 4) as u16;
        let bar_value = read_config_dword(location, bar_offset);

        if bar_value == 0 {
            bars.push(PciBar::None);
            i += 1;
            continue;
        }

        if bar_value & 1 == 0 {
            let is_64bit = (bar_value >> 1) & 3 == 2;
            let prefetchable = (bar_value >> 3) & 1 != 0;

            write_config_dword(location, bar_offset, 0xFFFF_FFFF);
            let size_mask = read_config_dword(location, bar_offset);
            write_config_dword(location, bar_offset, bar_value);

            let size = (!size_mask).wrapping_add(1) & 0xFFFF_FFF0;
            let mut address = (bar_value & 0xFFFF_FFF0) as u64;

            if is_64bit && i + 1 < bar_count {
                let upper_offset = bar_offset + 4;
                let upper = read_config_dword(location, upper_offset);
                address |= (upper as u64) << 32;
                bars.push(PciBar::Memory {
                    address,
                    size: size as u64,
                    prefetchable,
                    is_64bit: true,
                });
                bars.push(PciBar::None);
                i += 2;
            } else {
                bars.push(PciBar::Memory {
                    address,
                    size: size as u64,
                    prefetchable,
                    is_64bit: false,
                });
                i += 1;
            }
        } else {
            write_config_dword(location, bar_offset, 0xFFFF_FFFF);
            let size_mask = read_config_dword(location, bar_offset);
            write_config_dword(location, bar_offset, bar_value);

            let size = (!size_mask).wrapping_add(1) & 0xFFFF_FFFC;
            let address = bar_value & 0xFFFF_FFFC;
            bars.push(PciBar::Io { address, size });
            i += 1;
        }
    }
    bars
}

/// Enumerated PCI devices, keyed by location.
pub struct PciBus {
    devices: RwLock<BTreeMap<PciLocation, PciDevice>>,
}

impl PciBus {
    const fn new() -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
        }
    }

    fn enumerate(&self) {
        crate::println!("[PCI] enumerating bus...");
        let mut count = 0;
        for bus in 0..=255u8 {
            for dev in 0..32u8 {
                let location = PciLocation::new(bus, dev, 0);
                let Some(mut device) = probe_device(location) else {
                    continue;
                };
                read_device_config(&mut device);
                let multifunction = device.is_multifunction();
                crate::println!(
                    "[PCI] {:02x}:{:02x}.0 {:04x}:{:04x} class={:02x}",
                    bus, dev, device.vendor_id, device.device_id, device.class_code
                );
                self.devices.write().insert(location, device);
                count += 1;

                if multifunction {
                    for func in 1..8u8 {
                        let floc = PciLocation::new(bus, dev, func);
                        if let Some(mut fdev) = probe_device(floc) {
                            read_device_config(&mut fdev);
                            self.devices.write().insert(floc, fdev);
                            count += 1;
                        }
                    }
                }
            }
        }
        crate::println!("[PCI] enumeration complete: {count} functions");
    }

    pub fn get(&self, location: PciLocation) -> Option<PciDevice> {
        self.devices.read().get(&location).cloned()
    }

    pub fn all(&self) -> Vec<PciDevice> {
        self.devices.read().values().cloned().collect()
    }

    pub fn find_by_class(&self, class_code: u8) -> Vec<PciDevice> {
        self.devices
            .read()
            .values()
            .filter(|d| d.class_code == class_code)
            .cloned()
            .collect()
    }

    pub fn find_by_id(&self, vendor_id: u16, device_id: u16) -> Vec<PciDevice> {
        self.devices
            .read()
            .values()
            .filter(|d| d.vendor_id == vendor_id && d.device_id == device_id)
            .cloned()
            .collect()
    }

    /// Set command register bits (I/O space, memory space, bus master).
    pub fn enable(&self, device: &PciDevice) {
        let current = read_config_word(device.location, PciConfigRegister::Command as u16);
        let new = current
            | command_flags::IO_SPACE
            | command_flags::MEMORY_SPACE
            | command_flags::BUS_MASTER;
        let dword = read_config_dword(device.location, PciConfigRegister::Command as u16 & !3);
        let merged = (dword & 0xFFFF_0000) | new as u32;
        write_config_dword(device.location, PciConfigRegister::Command as u16 & !3, merged);
    }
}

static PCI_BUS: Mutex<PciBus> = Mutex::new(PciBus::new());

/// Enumerate the PCI bus. Idempotent at the call site (always rescans); the
/// kernel calls this once during boot.
pub fn init() {
    PCI_BUS.lock().enumerate();
}

pub fn find_by_class(class_code: u8) -> Vec<PciDevice> {
    PCI_BUS.lock().find_by_class(class_code)
}

pub fn find_by_id(vendor_id: u16, device_id: u16) -> Vec<PciDevice> {
    PCI_BUS.lock().find_by_id(vendor_id, device_id)
}

pub fn enable(device: &PciDevice) {
    PCI_BUS.lock().enable(device)
}

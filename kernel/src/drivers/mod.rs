//! Device drivers.
//!
//! PCI bus enumeration, the legacy ATA/ATAPI block driver, and the virtio
//! split-virtqueue block/net drivers.

pub mod ata;
pub mod pci;
pub mod virtio;
pub mod virtio_net;

pub use pci::{PciBus, PciDevice};

/// Probe the PCI bus and the legacy IDE channels. Virtio-net is brought up
/// separately, by `net::integration::register_drivers`, once the network
/// stack is far enough along to hand it a device name.
pub fn init() {
    crate::println!("[DRIVERS] initializing...");

    pci::init();
    ata::init();
    virtio::blk::init();

    crate::println!("[DRIVERS] device drivers initialized");
}

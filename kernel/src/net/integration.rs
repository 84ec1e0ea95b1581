//! Network driver integration.
//!
//! Bridges PCI bus enumeration ([`crate::drivers::pci`]) to the network
//! device registry ([`super::device`]): scans for a virtio-net card and, if
//! one is found, swaps it in for the loopback standing in as `eth0`.

use alloc::boxed::Box;

use super::device::{self, NetworkDevice};
use crate::drivers::pci;
use crate::drivers::virtio_net::VirtioNetDevice;
use crate::error::KernelError;

const VIRTIO_VENDOR_ID: u16 = 0x1AF4;
const VIRTIO_NET_DEVICE_ID_LEGACY: u16 = 0x1000;

/// Scan the PCI bus for a network device and register it under `eth0`.
///
/// Only the legacy virtio-net transport is supported (see
/// [`crate::drivers::virtio_net`]); a missing or unrecognized card is not an
/// error, since `eth0` already has a loopback stand-in from `device::init`.
pub fn register_drivers() -> Result<(), KernelError> {
    println!("[NET-INTEGRATION] Scanning PCI bus for network devices...");

    let candidates = pci::find_by_id(VIRTIO_VENDOR_ID, VIRTIO_NET_DEVICE_ID_LEGACY);
    let Some(pci_dev) = candidates.into_iter().next() else {
        println!("[NET-INTEGRATION] No virtio-net device found, keeping loopback eth0");
        return Ok(());
    };

    println!(
        "[NET-INTEGRATION] Found virtio-net at {:02x}:{:02x}.{}",
        pci_dev.location.bus, pci_dev.location.device, pci_dev.location.function
    );

    let Some(io_base) = pci_dev.bars.iter().find_map(|bar| bar.io_address()) else {
        println!("[NET-INTEGRATION] virtio-net has no I/O BAR, keeping loopback eth0");
        return Ok(());
    };

    pci::enable(&pci_dev);

    match VirtioNetDevice::new(io_base as u16) {
        Ok(dev) => {
            let mac = dev.mac_address();
            device::replace_device("eth0", Box::new(dev))?;
            println!(
                "[NET-INTEGRATION] eth0 bound to virtio-net (MAC: \
                 {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x})",
                mac.0[0], mac.0[1], mac.0[2], mac.0[3], mac.0[4], mac.0[5]
            );
            Ok(())
        }
        Err(e) => {
            println!(
                "[NET-INTEGRATION] virtio-net initialization failed: {e}, keeping loopback eth0"
            );
            Ok(())
        }
    }
}

/// Register a manually-created network device (for testing/debugging).
pub fn register_device(device: Box<dyn NetworkDevice>) -> Result<(), KernelError> {
    device::register_device(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_integration_scan_is_non_fatal() {
        assert!(register_drivers().is_ok());
    }
}

//! Virtio-net device driver
//!
//! Implements a network device driver for virtio-net PCI devices as
//! described in the virtio specification, section 5.1, using the legacy
//! (transitional) PCI transport and the same split-virtqueue machinery
//! [`super::virtio::queue`] shares with virtio-blk.
//!
//! Two virtqueues are used: queue 0 is the receive queue (device-writable
//! buffers the driver keeps topped up), queue 1 is the transmit queue
//! (device-readable buffers the driver posts one request at a time and
//! polls to completion, mirroring virtio-blk's request/response style).
//!
//! # QEMU usage
//!
//! ```text
//! -netdev user,id=net0 -device virtio-net-pci,netdev=net0
//! ```

#![allow(dead_code)]

use alloc::vec::Vec;
use core::sync::atomic::{self, Ordering};

use super::virtio::{
    queue::{VirtQueue, VIRTQ_DESC_F_WRITE},
    VirtioPciTransport, VirtioTransport,
};
use crate::{
    error::KernelError,
    mm::{FrameNumber, FRAME_ALLOCATOR, FRAME_SIZE},
    net::{
        device::{DeviceCapabilities, DeviceState, DeviceStatistics, NetworkDevice},
        MacAddress, Packet,
    },
};

/// Virtio-net PCI device IDs (virtio spec 5.1, legacy/transitional).
pub const VIRTIO_NET_DEVICE_ID_LEGACY: u16 = 0x1000;
pub const VIRTIO_NET_DEVICE_ID_MODERN: u16 = 0x1041;

/// Virtio-net feature bits (virtio spec 5.1.3)
mod features {
    pub const VIRTIO_NET_F_CSUM: u32 = 1 << 0;
    pub const VIRTIO_NET_F_MAC: u32 = 1 << 5;
    pub const VIRTIO_NET_F_STATUS: u32 = 1 << 16;
}

/// Legacy virtio-net packet header prepended to every tx/rx buffer (virtio
/// spec 5.1.6.1). 10 bytes: the trailing `num_buffers` field only exists
/// when VIRTIO_NET_F_MRG_RXBUF or VIRTIO_F_VERSION_1 is negotiated, neither
/// of which this driver requests.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VirtioNetHeader {
    flags: u8,
    gso_type: u8,
    hdr_len: u16,
    gso_size: u16,
    csum_start: u16,
    csum_offset: u16,
}

const NET_HDR_SIZE: usize = core::mem::size_of::<VirtioNetHeader>();
/// Ethernet MTU (1500) plus the 14-byte Ethernet header.
const MAX_FRAME_SIZE: usize = 1514;
const RX_BUFFER_SIZE: usize = NET_HDR_SIZE + MAX_FRAME_SIZE;
/// Number of receive buffers kept posted to the device at all times.
const RX_RING_DEPTH: usize = 32;

/// A single-frame DMA buffer backing one posted receive descriptor.
struct RxBuffer {
    phys: u64,
    virt: usize,
    frame: FrameNumber,
}

impl RxBuffer {
    fn new() -> Result<Self, KernelError> {
        if RX_BUFFER_SIZE > FRAME_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "RX_BUFFER_SIZE",
                value: "receive buffer exceeds single frame",
            });
        }

        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .map_err(|_| KernelError::ResourceExhausted {
                resource: "frame allocator",
            })?;
        let phys = frame.as_u64() * FRAME_SIZE as u64;
        let virt = phys_to_kernel_virt(phys);

        // SAFETY: virt points to a freshly allocated, kernel-accessible
        // frame with no other references.
        unsafe {
            core::ptr::write_bytes(virt as *mut u8, 0, FRAME_SIZE);
        }

        Ok(Self { phys, virt, frame })
    }

    /// Copy the Ethernet frame out of this buffer, skipping the virtio-net
    /// header the device wrote at the front.
    fn frame_bytes(&self, used_len: u32) -> Vec<u8> {
        let total = used_len as usize;
        let payload_len = total.saturating_sub(NET_HDR_SIZE);
        // SAFETY: virt + NET_HDR_SIZE .. + payload_len was written by the
        // device and is within our single-frame allocation (checked at
        // construction).
        unsafe {
            core::slice::from_raw_parts((self.virt + NET_HDR_SIZE) as *const u8, payload_len)
                .to_vec()
        }
    }
}

impl Drop for RxBuffer {
    fn drop(&mut self) {
        let _ = FRAME_ALLOCATOR.lock().free_frames(self.frame, 1);
    }
}

/// A transient single-frame DMA buffer for one transmit request.
struct TxBuffer {
    phys: u64,
    frame: FrameNumber,
}

impl TxBuffer {
    fn new(payload: &[u8]) -> Result<Self, KernelError> {
        let total = NET_HDR_SIZE + payload.len();
        if total > FRAME_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "payload",
                value: "transmit frame exceeds single frame",
            });
        }

        let frame = FRAME_ALLOCATOR
            .lock()
            .allocate_frames(1, None)
            .map_err(|_| KernelError::ResourceExhausted {
                resource: "frame allocator",
            })?;
        let phys = frame.as_u64() * FRAME_SIZE as u64;
        let virt = phys_to_kernel_virt(phys);

        // SAFETY: virt is freshly allocated and exclusively ours.
        unsafe {
            core::ptr::write_bytes(virt as *mut u8, 0, NET_HDR_SIZE);
            core::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                (virt + NET_HDR_SIZE) as *mut u8,
                payload.len(),
            );
        }

        Ok(Self { phys, frame })
    }
}

impl Drop for TxBuffer {
    fn drop(&mut self) {
        let _ = FRAME_ALLOCATOR.lock().free_frames(self.frame, 1);
    }
}

/// Virtio-net network device.
///
/// Manages a single virtio-net PCI device with separate receive (queue 0)
/// and transmit (queue 1) virtqueues.
pub struct VirtioNetDevice {
    transport: VirtioTransport,
    rx_queue: VirtQueue,
    tx_queue: VirtQueue,
    rx_buffers: Vec<RxBuffer>,
    rx_desc_ids: Vec<u16>,
    mac_address: MacAddress,
    features: u32,
    state: DeviceState,
    stats: DeviceStatistics,
}

impl VirtioNetDevice {
    /// Probe and initialize a virtio-net device at the given PCI BAR0 I/O
    /// base.
    ///
    /// Performs the full legacy virtio initialization sequence, then posts
    /// [`RX_RING_DEPTH`] receive buffers so incoming frames can be queued
    /// immediately.
    pub fn new(io_base: u16) -> Result<Self, KernelError> {
        let transport = VirtioTransport::Pci(VirtioPciTransport::new(io_base));

        transport.begin_init();

        let device_features = transport.read_device_features();
        let accepted =
            device_features & (features::VIRTIO_NET_F_MAC | features::VIRTIO_NET_F_STATUS);
        transport.write_guest_features(accepted);

        let _features_ok = transport.set_features_ok();

        transport.select_queue(0);
        let rx_queue_size = transport.read_queue_size();
        if rx_queue_size == 0 {
            return Err(KernelError::DeviceError {
                device: "virtio-net",
                code: 0x01,
            });
        }
        let mut rx_queue = VirtQueue::new(rx_queue_size)?;
        transport.write_queue_address(rx_queue.pfn());
        transport.write_queue_phys(
            rx_queue.phys_desc(),
            rx_queue.phys_avail(),
            rx_queue.phys_used(),
        );
        transport.set_queue_ready();

        transport.select_queue(1);
        let tx_queue_size = transport.read_queue_size();
        if tx_queue_size == 0 {
            return Err(KernelError::DeviceError {
                device: "virtio-net",
                code: 0x02,
            });
        }
        let tx_queue = VirtQueue::new(tx_queue_size)?;
        transport.write_queue_address(tx_queue.pfn());
        transport.write_queue_phys(
            tx_queue.phys_desc(),
            tx_queue.phys_avail(),
            tx_queue.phys_used(),
        );
        transport.set_queue_ready();

        transport.set_driver_ok();

        let mac_address = if (accepted & features::VIRTIO_NET_F_MAC) != 0 {
            let mut mac = [0u8; 6];
            for (i, byte) in mac.iter_mut().enumerate() {
                *byte = transport.read_device_config_u8(i as u16);
            }
            MacAddress(mac)
        } else {
            MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x57])
        };

        let mut rx_buffers = Vec::with_capacity(RX_RING_DEPTH);
        let mut rx_desc_ids = Vec::with_capacity(RX_RING_DEPTH);
        let depth = RX_RING_DEPTH.min(rx_queue_size as usize);
        for _ in 0..depth {
            let buf = RxBuffer::new()?;
            let desc = rx_queue
                .alloc_desc()
                .ok_or(KernelError::ResourceExhausted {
                    resource: "virtio-net rx descriptors",
                })?;
            // SAFETY: desc is a freshly allocated descriptor; buf.phys points
            // to a full-frame buffer of RX_BUFFER_SIZE <= FRAME_SIZE bytes
            // that stays alive for the buffer's lifetime in rx_buffers.
            unsafe {
                rx_queue.write_desc(desc, buf.phys, RX_BUFFER_SIZE as u32, VIRTQ_DESC_F_WRITE, 0);
            }
            rx_queue.push_avail(desc);
            rx_buffers.push(buf);
            rx_desc_ids.push(desc);
        }
        transport.notify_queue(0);

        crate::println!(
            "[VIRTIO-NET] Initialized: MAC {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}, {} rx buffers posted",
            mac_address.0[0],
            mac_address.0[1],
            mac_address.0[2],
            mac_address.0[3],
            mac_address.0[4],
            mac_address.0[5],
            depth,
        );

        Ok(Self {
            transport,
            rx_queue,
            tx_queue,
            rx_buffers,
            rx_desc_ids,
            mac_address,
            features: accepted,
            state: DeviceState::Up,
            stats: DeviceStatistics::default(),
        })
    }

    fn do_transmit(&mut self, payload: &[u8]) -> Result<(), KernelError> {
        let buf = TxBuffer::new(payload)?;
        let len = (NET_HDR_SIZE + payload.len()) as u32;

        let desc = self
            .tx_queue
            .alloc_desc()
            .ok_or(KernelError::ResourceExhausted {
                resource: "virtio-net tx descriptors",
            })?;

        // SAFETY: desc is a freshly allocated descriptor; buf.phys points to
        // `len` bytes of DMA memory that stays alive until the device
        // returns the descriptor (polled for below, before `buf` drops).
        unsafe {
            self.tx_queue.write_desc(desc, buf.phys, len, 0, 0);
        }

        atomic::fence(Ordering::Release);
        self.tx_queue.push_avail(desc);
        self.transport.notify_queue(1);

        let mut spins: u32 = 0;
        const MAX_SPINS: u32 = 10_000_000;
        while !self.tx_queue.has_used() {
            core::hint::spin_loop();
            spins += 1;
            if spins >= MAX_SPINS {
                self.tx_queue.free_chain(desc);
                return Err(KernelError::Timeout {
                    operation: "virtio-net transmit",
                    duration_ms: 0,
                });
            }
        }

        let _ = self.tx_queue.poll_used().ok_or(KernelError::DeviceError {
            device: "virtio-net",
            code: 0x03,
        })?;
        self.tx_queue.free_chain(desc);

        Ok(())
    }

    fn do_receive(&mut self) -> Result<Option<Packet>, KernelError> {
        let Some((used_id, used_len)) = self.rx_queue.poll_used() else {
            return Ok(None);
        };

        let Some(slot) = self.rx_desc_ids.iter().position(|&id| id == used_id) else {
            return Err(KernelError::DeviceError {
                device: "virtio-net",
                code: 0x04,
            });
        };

        let frame = self.rx_buffers[slot].frame_bytes(used_len);

        // Re-donate the same descriptor/buffer back to the device rather
        // than freeing it: the buffer's physical address never changes.
        self.rx_queue.push_avail(used_id);
        self.transport.notify_queue(0);

        Ok(Some(Packet::from_bytes(&frame)))
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac_address
    }
}

impl NetworkDevice for VirtioNetDevice {
    fn name(&self) -> &str {
        "eth0"
    }

    fn mac_address(&self) -> MacAddress {
        self.mac_address
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            max_transmission_unit: 1500,
            supports_vlan: false,
            supports_checksum_offload: (self.features & features::VIRTIO_NET_F_CSUM) != 0,
            supports_tso: false,
            supports_lro: false,
        }
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn set_state(&mut self, state: DeviceState) -> Result<(), KernelError> {
        self.state = state;
        Ok(())
    }

    fn statistics(&self) -> DeviceStatistics {
        self.stats
    }

    fn transmit(&mut self, packet: &Packet) -> Result<(), KernelError> {
        if self.state != DeviceState::Up {
            self.stats.tx_dropped += 1;
            return Err(KernelError::InvalidArgument {
                name: "device_state",
                value: "not up",
            });
        }

        match self.do_transmit(packet.data()) {
            Ok(()) => {
                self.stats.tx_packets += 1;
                self.stats.tx_bytes += packet.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.stats.tx_errors += 1;
                Err(e)
            }
        }
    }

    fn receive(&mut self) -> Result<Option<Packet>, KernelError> {
        if self.state != DeviceState::Up {
            return Ok(None);
        }

        match self.do_receive() {
            Ok(Some(packet)) => {
                self.stats.rx_packets += 1;
                self.stats.rx_bytes += packet.len() as u64;
                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.stats.rx_errors += 1;
                Err(e)
            }
        }
    }
}

/// Convert a physical address to a kernel-accessible virtual address.
///
/// Physical memory is identity-mapped on this target, so the conversion is
/// a no-op once paging is live.
fn phys_to_kernel_virt(phys: u64) -> usize {
    crate::arch::x86::msr::phys_to_virt(phys as usize).unwrap_or(phys as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_net_header_size() {
        assert_eq!(NET_HDR_SIZE, 10);
    }

    #[test_case]
    fn test_rx_buffer_fits_single_frame() {
        assert!(RX_BUFFER_SIZE <= FRAME_SIZE);
    }
}

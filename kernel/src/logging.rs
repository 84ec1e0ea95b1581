//! Kernel logger: installs a [`log::Log`] backend over the serial console.
//!
//! Mirrors the teacher's structured log service (a fixed-capacity circular
//! buffer tagged with level/subsystem/timestamp), but wired to the `log`
//! facade so ordinary `log::info!`/`log::debug!` call sites across the
//! kernel reach a real sink instead of the crate's silent no-op default.
//! `/proc/log` (see `fs::procfs`) drains the buffer for introspection.

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Maximum number of log entries the circular buffer can hold.
const LOG_BUFFER_CAPACITY: usize = 256;

/// Maximum length (in bytes) of a formatted log message stored in an entry.
const LOG_MESSAGE_MAX_LEN: usize = 120;

/// A single structured log entry, fixed-size so the buffer needs no heap.
#[derive(Clone, Copy)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub level: Level,
    pub target_buf: [u8; 16],
    pub target_len: u8,
    message_buf: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: u8,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            timestamp_ms: 0,
            level: Level::Trace,
            target_buf: [0u8; 16],
            target_len: 0,
            message_buf: [0u8; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    pub fn target(&self) -> &str {
        core::str::from_utf8(&self.target_buf[..self.target_len as usize]).unwrap_or("")
    }

    pub fn message(&self) -> &str {
        core::str::from_utf8(&self.message_buf[..self.message_len as usize]).unwrap_or("")
    }
}

struct LogBuffer {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    head: usize,
    count: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        const EMPTY: LogEntry = LogEntry::empty();
        Self {
            entries: [EMPTY; LOG_BUFFER_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % LOG_BUFFER_CAPACITY;
        if self.count < LOG_BUFFER_CAPACITY {
            self.count += 1;
        }
    }

    fn tail(&self) -> usize {
        if self.count < LOG_BUFFER_CAPACITY {
            0
        } else {
            self.head
        }
    }

    fn get(&self, i: usize) -> Option<&LogEntry> {
        if i >= self.count {
            return None;
        }
        Some(&self.entries[(self.tail() + i) % LOG_BUFFER_CAPACITY])
    }
}

static BUFFER: Mutex<LogBuffer> = Mutex::new(LogBuffer::new());

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp_ms = crate::timer::get_uptime_ms();
        let level = record.level();
        let target = record.target();

        let mut target_buf = [0u8; 16];
        let target_len = target.len().min(target_buf.len());
        target_buf[..target_len].copy_from_slice(&target.as_bytes()[..target_len]);

        // `format_args` can't be sized ahead of time; render into a fixed
        // scratch buffer via `core::fmt::Write` and truncate silently.
        struct Scratch {
            buf: [u8; LOG_MESSAGE_MAX_LEN],
            len: usize,
        }
        impl core::fmt::Write for Scratch {
            fn write_str(&mut self, s: &str) -> core::fmt::Result {
                let remaining = self.buf.len() - self.len;
                let take = remaining.min(s.len());
                self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
                self.len += take;
                Ok(())
            }
        }
        let mut scratch = Scratch {
            buf: [0u8; LOG_MESSAGE_MAX_LEN],
            len: 0,
        };
        let _ = core::fmt::write(&mut scratch, *record.args());

        crate::serial_println!(
            "[{:>8}ms] {:<5} {}: {}",
            timestamp_ms,
            level,
            target,
            core::str::from_utf8(&scratch.buf[..scratch.len]).unwrap_or("<non-utf8>")
        );

        let entry = LogEntry {
            timestamp_ms,
            level,
            target_buf,
            target_len: target_len as u8,
            message_buf: scratch.buf,
            message_len: scratch.len as u8,
        };
        BUFFER.lock().push(entry);
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger as the global `log` backend. Idempotent: a
/// second call is a harmless no-op (the facade only accepts one logger per
/// process).
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}

/// Iterate the buffered log entries oldest-first, for `/proc/log`.
pub fn drain<F: FnMut(&LogEntry)>(mut f: F) -> usize {
    let buffer = BUFFER.lock();
    for i in 0..buffer.count {
        if let Some(entry) = buffer.get(i) {
            f(entry);
        }
    }
    buffer.count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_wraps_without_growing() {
        let mut buf = LogBuffer::new();
        for i in 0..LOG_BUFFER_CAPACITY + 10 {
            let mut e = LogEntry::empty();
            e.timestamp_ms = i as u64;
            buf.push(e);
        }
        assert_eq!(buf.count, LOG_BUFFER_CAPACITY);
        assert_eq!(buf.get(0).unwrap().timestamp_ms, 10);
    }
}

//! Kernel-wide error type.
//!
//! Every fallible boundary in the kernel returns `KernelResult<T>`. Variants
//! carry enough context (path, pid, fd, device name) to write a useful log
//! line without the caller re-deriving it.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// No such file, process, device, or other named resource.
    NotFound {
        resource: &'static str,
        id: u64,
    },
    /// Caller lacks permission for the requested operation.
    PermissionDenied {
        operation: &'static str,
    },
    /// Resource already exists (e.g. mount point, PID reuse).
    AlreadyExists {
        resource: &'static str,
        id: u64,
    },
    /// Argument failed validation.
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    /// A fixed-size pool (frames, FDs, PIDs, ring slots) is exhausted.
    ResourceExhausted {
        resource: &'static str,
    },
    /// Non-blocking operation has no data/slot ready right now.
    WouldBlock,
    /// Operation did not complete within its deadline.
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },
    /// A hardware device reported an error condition.
    DeviceError {
        device: &'static str,
        code: u32,
    },
    /// A malformed or unsupported wire format was received.
    ProtocolError {
        protocol: &'static str,
        reason: &'static str,
    },
    /// Unrecoverable condition; the caller should treat this as fatal.
    Fatal {
        reason: &'static str,
    },
    /// Caller invoked an operation from a state machine state that doesn't
    /// support it (e.g. `listen` on a socket that isn't `bound`).
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    /// Subsystem used before its `init()` ran.
    NotInitialized {
        subsystem: &'static str,
    },
    /// Feature recognized but intentionally unimplemented.
    NotImplemented {
        feature: &'static str,
    },
    /// Write end of a pipe/socket closed under the reader, or vice versa.
    BrokenPipe,
    /// Address not currently mapped in the faulting address space.
    UnmappedMemory {
        addr: usize,
    },
    /// Filesystem-specific condition that doesn't fit the generic kinds.
    Fs(FsError),
    /// A virtual address is not a valid target for the attempted operation
    /// (unmapped, misaligned, or outside the region it was claimed to be in).
    InvalidAddress {
        addr: usize,
    },
    /// Physical frame or heap allocation failed.
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    /// No process with the given pid is known to the scheduler.
    ProcessNotFound {
        pid: u64,
    },
    /// No thread with the given tid is known to the scheduler.
    ThreadNotFound {
        tid: u64,
    },
}

/// Filesystem-specific errors, nested under [`KernelError::Fs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    NotADirectory,
    NotAFile,
    IsADirectory,
    ReadOnly,
    InvalidPath,
    NoRootFs,
    AlreadyMounted,
    NotMounted,
    UnknownFsType,
    DirectoryNotEmpty,
    TooManyOpenFiles,
    BadFileDescriptor,
    NotSupported,
    NotASymlink,
    FileTooLarge,
}

/// Result type alias used at every fallible kernel boundary.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { resource, id } => write!(f, "{resource} with id {id} not found"),
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for operation: {operation}")
            }
            Self::AlreadyExists { resource, id } => {
                write!(f, "{resource} with id {id} already exists")
            }
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{name}': {value}")
            }
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {resource}"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::Timeout {
                operation,
                duration_ms,
            } => write!(f, "timeout during {operation}: {duration_ms} ms"),
            Self::DeviceError { device, code } => {
                write!(f, "device error on {device}: code {code:#x}")
            }
            Self::ProtocolError { protocol, reason } => {
                write!(f, "{protocol} protocol error: {reason}")
            }
            Self::Fatal { reason } => write!(f, "fatal: {reason}"),
            Self::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {expected}, got {actual}")
            }
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {subsystem}")
            }
            Self::NotImplemented { feature } => write!(f, "not implemented: {feature}"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at {addr:#x}"),
            Self::Fs(e) => write!(f, "filesystem error: {e:?}"),
            Self::InvalidAddress { addr } => write!(f, "invalid address {addr:#x}"),
            Self::OutOfMemory {
                requested,
                available,
            } => write!(f, "out of memory: requested {requested}, available {available}"),
            Self::ProcessNotFound { pid } => write!(f, "no such process: pid {pid}"),
            Self::ThreadNotFound { tid } => write!(f, "no such thread: tid {tid}"),
        }
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::Fs(err)
    }
}

/// `VfsNode` methods return `&'static str` rather than `KernelError` (trait
/// objects can't depend on the crate-wide error type without a cycle), so
/// every caller that threads them through `?` needs this conversion.
impl From<&'static str> for KernelError {
    fn from(reason: &'static str) -> Self {
        Self::Fatal { reason }
    }
}

/// Helper macro for constructing common error variants tersely.
#[macro_export]
macro_rules! kernel_error {
    (NotFound { $resource:expr, $id:expr }) => {
        $crate::error::KernelError::NotFound {
            resource: $resource,
            id: $id,
        }
    };
    (InvalidArgument { $name:expr => $value:expr }) => {
        $crate::error::KernelError::InvalidArgument {
            name: $name,
            value: $value,
        }
    };
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
}

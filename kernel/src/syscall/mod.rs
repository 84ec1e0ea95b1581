//! System call interface for JSOS.
//!
//! Dispatches the numbered syscall table a hosted process's trap gate
//! (`arch::x86::interrupts`) lands on into the kernel subsystems that back
//! it: process/thread control, the VFS, sockets, the address space, the
//! clock, and whole-system control (reboot/halt/panic).

#![allow(dead_code)]

pub mod filesystem;
pub mod info;
pub mod memory;
pub mod network;
pub mod network_ext_syscalls;
pub mod process;
pub mod signal;
pub mod system;
pub mod time;
mod userspace;

use userspace::validate_user_ptr;

/// System call numbers.
///
/// Grouped by subsystem with headroom between groups for future growth,
/// matching the numbering a hosted process's syscall stub table is built
/// against.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    // Process management (0-19)
    Exit = 0,
    Fork = 1,
    Exec = 2,
    Wait = 3,
    GetPid = 4,
    GetPPid = 5,
    Kill = 6,
    Sleep = 7,
    SetPriority = 8,
    GetPriority = 9,

    // Thread management (20-29)
    ThreadCreate = 20,
    ThreadExit = 21,
    ThreadJoin = 22,
    ThreadGetTid = 23,
    ThreadSetAffinity = 24,
    ThreadGetAffinity = 25,

    // File and VFS operations (30-59)
    Open = 30,
    Close = 31,
    Read = 32,
    Write = 33,
    Seek = 34,
    Stat = 35,
    Truncate = 36,
    Mkdir = 37,
    Rmdir = 38,
    Mount = 39,
    Unmount = 40,
    Sync = 41,
    Pipe = 42,
    Dup = 43,
    Dup2 = 44,
    Ioctl = 45,

    // Memory management (60-69)
    Sbrk = 60,
    Mmap = 61,
    Munmap = 62,

    // Time (70-79)
    Uptime = 70,
    GetTimeNs = 71,
    SetWallClock = 72,
    CreateTimer = 73,
    CancelTimer = 74,

    // Signals (80-89)
    SigAction = 80,
    SigProcMask = 81,
    SigSuspend = 82,
    SigReturn = 83,

    // System control (90-99)
    Reboot = 90,
    Halt = 91,
    PanicSyscall = 92,

    // Kernel/system information (100-109)
    GetKernelInfo = 100,
    Uname = 101,

    // Sockets (110-129)
    Socket = 110,
    Bind = 111,
    Listen = 112,
    Connect = 113,
    Accept = 114,
    Send = 115,
    Recv = 116,
    SocketClose = 117,

    // Extended socket operations (130-139)
    SendTo = 130,
    RecvFrom = 131,
    GetSockName = 132,
    GetPeerName = 133,
    SetSockOpt = 134,
    GetSockOpt = 135,
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        use Syscall::*;
        Ok(match value {
            0 => Exit,
            1 => Fork,
            2 => Exec,
            3 => Wait,
            4 => GetPid,
            5 => GetPPid,
            6 => Kill,
            7 => Sleep,
            8 => SetPriority,
            9 => GetPriority,

            20 => ThreadCreate,
            21 => ThreadExit,
            22 => ThreadJoin,
            23 => ThreadGetTid,
            24 => ThreadSetAffinity,
            25 => ThreadGetAffinity,

            30 => Open,
            31 => Close,
            32 => Read,
            33 => Write,
            34 => Seek,
            35 => Stat,
            36 => Truncate,
            37 => Mkdir,
            38 => Rmdir,
            39 => Mount,
            40 => Unmount,
            41 => Sync,
            42 => Pipe,
            43 => Dup,
            44 => Dup2,
            45 => Ioctl,

            60 => Sbrk,
            61 => Mmap,
            62 => Munmap,

            70 => Uptime,
            71 => GetTimeNs,
            72 => SetWallClock,
            73 => CreateTimer,
            74 => CancelTimer,

            80 => SigAction,
            81 => SigProcMask,
            82 => SigSuspend,
            83 => SigReturn,

            90 => Reboot,
            91 => Halt,
            92 => PanicSyscall,

            100 => GetKernelInfo,
            101 => Uname,

            110 => Socket,
            111 => Bind,
            112 => Listen,
            113 => Connect,
            114 => Accept,
            115 => Send,
            116 => Recv,
            117 => SocketClose,

            130 => SendTo,
            131 => RecvFrom,
            132 => GetSockName,
            133 => GetPeerName,
            134 => SetSockOpt,
            135 => GetSockOpt,

            _ => return Err(()),
        })
    }
}

/// System call result type: a non-negative value on success, or a negative
/// error on failure (callers interpret the returned `isize` per §7).
pub type SyscallResult = Result<usize, SyscallError>;

/// System call error codes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall = -1,
    InvalidArgument = -2,
    PermissionDenied = -3,
    ResourceNotFound = -4,
    OutOfMemory = -5,
    WouldBlock = -6,
    Interrupted = -7,
    InvalidState = -8,
    InvalidPointer = -9,
    ProcessNotFound = -10,
    IoError = -11,
    BadFileDescriptor = -12,
}

/// Check that a user-space pointer/length pair is non-null and entirely
/// below the kernel/user split.
pub(crate) fn validate_user_buffer(ptr: usize, len: usize) -> Result<(), SyscallError> {
    validate_user_ptr(ptr, len)
}

/// Check that a user-space pointer is valid for a value of type `T`.
pub(crate) fn validate_user_ptr_typed<T>(ptr: usize) -> Result<(), SyscallError> {
    validate_user_ptr(ptr, core::mem::size_of::<T>())
}

/// System call handler entry point, invoked from the syscall trap gate
/// with the raw register arguments.
#[no_mangle]
pub extern "C" fn syscall_handler(
    syscall_num: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> isize {
    let result = match Syscall::try_from(syscall_num) {
        Ok(syscall) => handle_syscall(syscall, arg1, arg2, arg3, arg4, arg5),
        Err(_) => Err(SyscallError::InvalidSyscall),
    };

    match result {
        Ok(value) => value as isize,
        Err(error) => error as i32 as isize,
    }
}

/// Dispatch a decoded syscall to its handler.
fn handle_syscall(
    syscall: Syscall,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> SyscallResult {
    use Syscall::*;

    match syscall {
        // Process management
        Exit => process::sys_exit(arg1),
        Fork => process::sys_fork(),
        Exec => process::sys_exec(arg1, arg2, arg3),
        Wait => process::sys_wait(arg1 as isize, arg2, arg3),
        GetPid => process::sys_getpid(),
        GetPPid => process::sys_getppid(),
        Kill => system::sys_kill(arg1, arg2),
        Sleep => system::sys_sleep(arg1),
        SetPriority => process::sys_setpriority(arg1, arg2, arg3),
        GetPriority => process::sys_getpriority(arg1, arg2),

        // Thread management
        ThreadCreate => process::sys_thread_create(arg1, arg2, arg3, arg4),
        ThreadExit => process::sys_thread_exit(arg1),
        ThreadJoin => process::sys_thread_join(arg1, arg2),
        ThreadGetTid => process::sys_gettid(),
        ThreadSetAffinity => process::sys_thread_setaffinity(arg1, arg2, arg3),
        ThreadGetAffinity => process::sys_thread_getaffinity(arg1, arg2, arg3),

        // File and VFS operations
        Open => filesystem::sys_open(arg1, arg2, arg3),
        Close => filesystem::sys_close(arg1),
        Read => filesystem::sys_read(arg1, arg2, arg3),
        Write => filesystem::sys_write(arg1, arg2, arg3),
        Seek => filesystem::sys_seek(arg1, arg2 as isize, arg3),
        Stat => filesystem::sys_stat(arg1, arg2),
        Truncate => filesystem::sys_truncate(arg1, arg2),
        Mkdir => filesystem::sys_mkdir(arg1, arg2),
        Rmdir => filesystem::sys_rmdir(arg1),
        Mount => filesystem::sys_mount(arg1, arg2, arg3, arg4),
        Unmount => filesystem::sys_unmount(arg1),
        Sync => filesystem::sys_sync(),
        Pipe => filesystem::sys_pipe(arg1),
        Dup => filesystem::sys_dup(arg1),
        Dup2 => filesystem::sys_dup2(arg1, arg2),
        Ioctl => filesystem::sys_ioctl(arg1, arg2, arg3),

        // Memory management
        Sbrk => memory::sys_brk(arg1),
        Mmap => memory::sys_mmap(arg1, arg2),
        Munmap => memory::sys_munmap(arg1, arg2),

        // Time
        Uptime => time::sys_time_get_uptime(),
        GetTimeNs => time::sys_time_get_time_ns(),
        SetWallClock => time::sys_time_set_wall_clock(arg1),
        CreateTimer => time::sys_time_create_timer(arg1, arg2, arg3),
        CancelTimer => time::sys_time_cancel_timer(arg1),

        // Signals
        SigAction => signal::sys_sigaction(arg1, arg2, arg3),
        SigProcMask => signal::sys_sigprocmask(arg1, arg2, arg3),
        SigSuspend => signal::sys_sigsuspend(arg1),
        SigReturn => signal::sys_sigreturn(arg1),

        // System control
        Reboot => system::sys_reboot(),
        Halt => system::sys_halt(),
        PanicSyscall => system::sys_panic(arg1, arg2),

        // Kernel/system information
        GetKernelInfo => info::sys_get_kernel_info(arg1),
        Uname => info::sys_uname(arg1),

        // Sockets
        Socket => network::sys_socket(arg1, arg2, arg3),
        Bind => network::sys_bind(arg1, arg2),
        Listen => network::sys_listen(arg1, arg2),
        Connect => network::sys_connect(arg1, arg2),
        Accept => network::sys_accept(arg1, arg2),
        Send => network::sys_send(arg1, arg2, arg3, arg4),
        Recv => network::sys_recv(arg1, arg2, arg3, arg4),
        SocketClose => network::sys_socket_close(arg1),

        // Extended socket operations
        SendTo => network_ext_syscalls::sys_net_sendto(arg1, arg2, arg3, arg4, arg5),
        RecvFrom => network_ext_syscalls::sys_net_recvfrom(arg1, arg2, arg3, arg4),
        GetSockName => network_ext_syscalls::sys_net_getsockname(arg1, arg2, arg3),
        GetPeerName => network_ext_syscalls::sys_net_getpeername(arg1, arg2, arg3),
        SetSockOpt => network_ext_syscalls::sys_net_setsockopt(arg1, arg2, arg3, arg4, arg5),
        GetSockOpt => network_ext_syscalls::sys_net_getsockopt(arg1, arg2, arg3, arg4),
    }
}

//! Core socket system calls (spec §4.11 `socket`): socket, bind, listen,
//! connect, send, recv, accept, close.
//!
//! Sockets live in their own id space (`net::socket::SOCKET_TABLE`) rather
//! than the per-process file table -- JSOS doesn't unify socket handles and
//! file descriptors, so a socket id returned by `sys_socket` is only valid
//! as an argument to the syscalls in this module (and the extended ones in
//! [`super::network_ext_syscalls`]).

use super::{SyscallError, SyscallResult};
use crate::net::{
    socket::{self, SocketDomain, SocketProtocol, SocketType},
    IpAddress, Ipv4Address, SocketAddr,
};

const AF_INET: u16 = 2;

fn domain_from_raw(domain: usize) -> Result<SocketDomain, SyscallError> {
    match domain {
        2 => Ok(SocketDomain::Inet),
        10 => Ok(SocketDomain::Inet6),
        1 => Ok(SocketDomain::Unix),
        _ => Err(SyscallError::InvalidArgument),
    }
}

fn type_from_raw(socket_type: usize) -> Result<SocketType, SyscallError> {
    match socket_type {
        1 => Ok(SocketType::Stream),
        2 => Ok(SocketType::Dgram),
        3 => Ok(SocketType::Raw),
        _ => Err(SyscallError::InvalidArgument),
    }
}

fn protocol_from_raw(protocol: usize) -> Result<SocketProtocol, SyscallError> {
    match protocol {
        0 => Ok(SocketProtocol::Default),
        6 => Ok(SocketProtocol::Tcp),
        17 => Ok(SocketProtocol::Udp),
        1 => Ok(SocketProtocol::Icmp),
        _ => Err(SyscallError::InvalidArgument),
    }
}

/// Parse a `struct sockaddr_in` at `addr_ptr` (family, port_be, addr_be,
/// zero-padding -- 16 bytes total, matching `network_ext_syscalls`).
fn read_sockaddr(addr_ptr: usize) -> Result<SocketAddr, SyscallError> {
    super::validate_user_buffer(addr_ptr, 16)?;

    // SAFETY: addr_ptr was validated above to point at 16 readable bytes.
    let family = unsafe { *(addr_ptr as *const u16) };
    if family != AF_INET {
        return Err(SyscallError::InvalidArgument);
    }
    let port_be = unsafe { *((addr_ptr + 2) as *const u16) };
    let addr_be = unsafe { *((addr_ptr + 4) as *const u32) };

    Ok(SocketAddr {
        ip: IpAddress::V4(Ipv4Address(addr_be.to_be_bytes())),
        port: u16::from_be(port_be),
    })
}

/// Create a socket (`socket`). Returns a socket id on success.
pub fn sys_socket(domain: usize, socket_type: usize, protocol: usize) -> SyscallResult {
    let domain = domain_from_raw(domain)?;
    let socket_type = type_from_raw(socket_type)?;
    let protocol = protocol_from_raw(protocol)?;

    socket::create_socket(domain, socket_type, protocol).map_err(|_| SyscallError::InvalidArgument)
}

/// Bind a socket to a local address (`bind`).
pub fn sys_bind(fd: usize, addr_ptr: usize) -> SyscallResult {
    let addr = read_sockaddr(addr_ptr)?;
    let socket = socket::get_socket_mut(fd).map_err(|_| SyscallError::BadFileDescriptor)?;
    socket.bind(addr).map_err(|_| SyscallError::InvalidState)?;

    if socket.socket_type == SocketType::Dgram {
        crate::net::udp::register_socket(fd, addr);
    }
    Ok(0)
}

/// Mark a stream socket as listening (`listen`).
pub fn sys_listen(fd: usize, backlog: usize) -> SyscallResult {
    let socket = socket::get_socket_mut(fd).map_err(|_| SyscallError::BadFileDescriptor)?;
    socket.listen(backlog).map_err(|_| SyscallError::InvalidState)?;
    Ok(0)
}

/// Connect a socket to a remote address (`connect`).
pub fn sys_connect(fd: usize, addr_ptr: usize) -> SyscallResult {
    let addr = read_sockaddr(addr_ptr)?;
    let socket = socket::get_socket_mut(fd).map_err(|_| SyscallError::BadFileDescriptor)?;
    socket.connect(addr).map_err(|_| SyscallError::InvalidState)?;
    Ok(0)
}

/// Accept a pending connection on a listening socket (`accept`).
///
/// If `addr_ptr` is non-zero, the peer address is written there as a
/// `sockaddr_in` (16 bytes).
pub fn sys_accept(fd: usize, addr_ptr: usize) -> SyscallResult {
    let (new_fd, peer) = socket::accept_connection(fd).map_err(|e| match e {
        crate::error::KernelError::WouldBlock => SyscallError::WouldBlock,
        _ => SyscallError::InvalidState,
    })?;

    if addr_ptr != 0 {
        super::validate_user_buffer(addr_ptr, 16)?;
        let bytes = match peer.ip {
            IpAddress::V4(v4) => v4.0,
            IpAddress::V6(_) => [0, 0, 0, 0],
        };
        // SAFETY: addr_ptr was validated above to point at 16 bytes.
        unsafe {
            *(addr_ptr as *mut u16) = AF_INET;
            *((addr_ptr + 2) as *mut u16) = peer.port.to_be();
            *((addr_ptr + 4) as *mut u32) = u32::from_be_bytes(bytes);
            core::ptr::write_bytes((addr_ptr + 8) as *mut u8, 0, 8);
        }
    }

    Ok(new_fd)
}

/// Send data on a connected socket (`send`).
pub fn sys_send(fd: usize, buf_ptr: usize, buf_len: usize, flags: usize) -> SyscallResult {
    super::validate_user_buffer(buf_ptr, buf_len)?;
    // SAFETY: buf_ptr/buf_len were validated above.
    let data = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, buf_len) };

    let socket = socket::get_socket(fd).map_err(|_| SyscallError::BadFileDescriptor)?;
    socket
        .send(data, flags as u32)
        .map_err(|_| SyscallError::IoError)
}

/// Receive data on a connected socket (`recv`).
pub fn sys_recv(fd: usize, buf_ptr: usize, buf_len: usize, flags: usize) -> SyscallResult {
    super::validate_user_buffer(buf_ptr, buf_len)?;
    // SAFETY: buf_ptr/buf_len were validated above.
    let buf = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, buf_len) };

    let socket = socket::get_socket(fd).map_err(|_| SyscallError::BadFileDescriptor)?;
    socket
        .recv(buf, flags as u32)
        .map_err(|_| SyscallError::IoError)
}

/// Close a socket (`close` on a socket id, distinct from the file-table
/// `close`).
pub fn sys_socket_close(fd: usize) -> SyscallResult {
    socket::destroy_socket(fd).map_err(|_| SyscallError::BadFileDescriptor)?;
    Ok(0)
}

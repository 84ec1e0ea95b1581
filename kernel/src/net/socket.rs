//! Socket API implementation

use alloc::{collections::BTreeMap, vec::Vec};

use spin::Mutex;

use super::{IpAddress, SocketAddr};
use crate::error::KernelError;

/// Socket domain (address family)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDomain {
    /// IPv4 Internet protocols
    Inet,
    /// IPv6 Internet protocols
    Inet6,
    /// Unix domain sockets
    Unix,
}

/// Socket type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Stream socket (TCP)
    Stream,
    /// Datagram socket (UDP)
    Dgram,
    /// Raw socket
    Raw,
}

/// Socket protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtocol {
    /// Default protocol for socket type
    Default,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
}

/// Socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unbound,
    Bound,
    Listening,
    Connected,
    Closed,
}

/// Socket options
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub reuse_addr: bool,
    pub reuse_port: bool,
    pub broadcast: bool,
    pub keepalive: bool,
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
    pub recv_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_addr: false,
            reuse_port: false,
            broadcast: false,
            keepalive: false,
            recv_buffer_size: 65536,
            send_buffer_size: 65536,
            recv_timeout_ms: None,
            send_timeout_ms: None,
        }
    }
}

/// Generic socket handle
#[derive(Debug, Clone)]
pub struct Socket {
    pub id: usize,
    pub domain: SocketDomain,
    pub socket_type: SocketType,
    pub protocol: SocketProtocol,
    pub state: SocketState,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub options: SocketOptions,
}

impl Socket {
    /// Create a new socket
    pub fn new(
        domain: SocketDomain,
        socket_type: SocketType,
        protocol: SocketProtocol,
    ) -> Result<Self, KernelError> {
        // Validate domain/type/protocol combination
        match (domain, socket_type, protocol) {
            (SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp)
            | (SocketDomain::Inet, SocketType::Stream, SocketProtocol::Default)
            | (SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Udp)
            | (SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Default)
            | (SocketDomain::Inet, SocketType::Raw, _) => {}
            _ => {
                return Err(KernelError::InvalidArgument {
                    name: "socket_combination",
                    value: "unsupported",
                })
            }
        }

        Ok(Self {
            id: 0, // Will be assigned by socket table
            domain,
            socket_type,
            protocol,
            state: SocketState::Unbound,
            local_addr: None,
            remote_addr: None,
            options: SocketOptions::default(),
        })
    }

    /// Bind socket to local address
    pub fn bind(&mut self, addr: SocketAddr) -> Result<(), KernelError> {
        if self.state != SocketState::Unbound {
            return Err(KernelError::InvalidState {
                expected: "unbound",
                actual: "already_bound",
            });
        }

        // Address reuse (SO_REUSEADDR) is accepted by setsockopt but this
        // socket table has no address-in-use tracking to enforce it against.

        self.local_addr = Some(addr);
        self.state = SocketState::Bound;
        Ok(())
    }

    /// Listen for connections (TCP only)
    pub fn listen(&mut self, backlog: usize) -> Result<(), KernelError> {
        if self.socket_type != SocketType::Stream {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_stream",
            });
        }

        if self.state != SocketState::Bound {
            return Err(KernelError::InvalidState {
                expected: "bound",
                actual: "not_bound",
            });
        }

        let local = self.local_addr.ok_or(KernelError::InvalidState {
            expected: "bound",
            actual: "no_local_addr",
        })?;
        // The requested backlog size is advisory; the accept queue's cap is
        // a fixed constant (see `queue_pending_connection`).
        let _ = backlog;
        super::tcp::listen(self.id, local)?;

        self.state = SocketState::Listening;
        Ok(())
    }

    /// Connect to remote address
    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), KernelError> {
        match self.state {
            SocketState::Unbound | SocketState::Bound => {}
            _ => {
                return Err(KernelError::InvalidState {
                    expected: "unbound_or_bound",
                    actual: "other",
                })
            }
        }

        // Auto-bind if not bound
        if self.state == SocketState::Unbound {
            let local_addr = match addr.ip() {
                IpAddress::V4(_) => SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0),
                IpAddress::V6(_) => {
                    return Err(KernelError::NotImplemented {
                        feature: "ipv6_auto_bind",
                    })
                }
            };
            self.bind(local_addr)?;
        }

        if self.socket_type == SocketType::Stream {
            let local = self.local_addr.expect("just bound above");
            super::tcp::connect(self.id, local, addr)?;
        }

        self.remote_addr = Some(addr);
        self.state = SocketState::Connected;

        Ok(())
    }

    /// Accept incoming connection (TCP only)
    pub fn accept(&self) -> Result<(Socket, SocketAddr), KernelError> {
        if self.socket_type != SocketType::Stream {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_stream",
            });
        }

        if self.state != SocketState::Listening {
            return Err(KernelError::InvalidState {
                expected: "listening",
                actual: "not_listening",
            });
        }

        let (new_id, peer) = accept_connection(self.id)?;
        let accepted = get_socket(new_id)?.clone();
        Ok((accepted, peer))
    }

    /// Send data
    pub fn send(&self, data: &[u8], flags: u32) -> Result<usize, KernelError> {
        if self.state != SocketState::Connected {
            return Err(KernelError::InvalidState {
                expected: "connected",
                actual: "not_connected",
            });
        }
        let _ = flags;

        let remote = self.remote_addr.ok_or(KernelError::InvalidState {
            expected: "remote_addr_set",
            actual: "no_remote_addr",
        })?;

        match self.socket_type {
            SocketType::Stream => super::tcp::transmit_data(self.id, data),
            SocketType::Dgram => {
                let local = self
                    .local_addr
                    .unwrap_or_else(|| SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0));
                super::udp::send_packet(local, remote, data)
            }
            SocketType::Raw => Err(KernelError::NotImplemented {
                feature: "raw_socket_send",
            }),
        }
    }

    /// Send data to specific address (UDP)
    pub fn send_to(&self, data: &[u8], dest: SocketAddr, flags: u32) -> Result<usize, KernelError> {
        if self.socket_type != SocketType::Dgram {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_dgram",
            });
        }
        let _ = flags;

        let local = self
            .local_addr
            .unwrap_or_else(|| SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0));
        super::udp::send_packet(local, dest, data)
    }

    /// Receive data
    pub fn recv(&self, buffer: &mut [u8], flags: u32) -> Result<usize, KernelError> {
        if self.state != SocketState::Connected {
            return Err(KernelError::InvalidState {
                expected: "connected",
                actual: "not_connected",
            });
        }
        let _ = flags;

        match self.socket_type {
            SocketType::Stream => {
                let mut buf = Vec::new();
                let n = super::tcp::receive_data(self.id, &mut buf);
                let copy_len = n.min(buffer.len());
                buffer[..copy_len].copy_from_slice(&buf[..copy_len]);
                Ok(copy_len)
            }
            SocketType::Dgram => {
                let (n, _from) = super::udp::receive_from(self.id, buffer)?;
                Ok(n)
            }
            SocketType::Raw => Err(KernelError::NotImplemented {
                feature: "raw_socket_recv",
            }),
        }
    }

    /// Receive data with source address
    pub fn recv_from(
        &self,
        buffer: &mut [u8],
        flags: u32,
    ) -> Result<(usize, SocketAddr), KernelError> {
        if self.state == SocketState::Unbound {
            return Err(KernelError::InvalidState {
                expected: "bound",
                actual: "unbound",
            });
        }
        let _ = flags;

        match self.socket_type {
            SocketType::Dgram => super::udp::receive_from(self.id, buffer),
            SocketType::Stream => {
                let mut buf = Vec::new();
                let n = super::tcp::receive_data(self.id, &mut buf);
                let copy_len = n.min(buffer.len());
                buffer[..copy_len].copy_from_slice(&buf[..copy_len]);
                let peer = self.remote_addr.ok_or(KernelError::InvalidState {
                    expected: "connected",
                    actual: "not_connected",
                })?;
                Ok((copy_len, peer))
            }
            SocketType::Raw => Err(KernelError::NotImplemented {
                feature: "raw_socket_recvfrom",
            }),
        }
    }

    /// Close socket
    pub fn close(&mut self) -> Result<(), KernelError> {
        if self.socket_type == SocketType::Stream {
            if self.state == SocketState::Listening {
                if let Some(local) = self.local_addr {
                    super::tcp::stop_listening(local);
                }
            } else {
                super::tcp::close_connection(self.id);
            }
        } else if self.socket_type == SocketType::Dgram {
            super::udp::unregister_socket(self.id);
        }

        self.state = SocketState::Closed;
        Ok(())
    }

    /// Set socket option
    pub fn set_option(&mut self, option: SocketOption) -> Result<(), KernelError> {
        match option {
            SocketOption::ReuseAddr(val) => self.options.reuse_addr = val,
            SocketOption::ReusePort(val) => self.options.reuse_port = val,
            SocketOption::Broadcast(val) => self.options.broadcast = val,
            SocketOption::KeepAlive(val) => self.options.keepalive = val,
            SocketOption::RecvBufferSize(val) => self.options.recv_buffer_size = val,
            SocketOption::SendBufferSize(val) => self.options.send_buffer_size = val,
            SocketOption::RecvTimeout(val) => self.options.recv_timeout_ms = val,
            SocketOption::SendTimeout(val) => self.options.send_timeout_ms = val,
        }
        Ok(())
    }
}

/// Socket option values
#[derive(Debug, Clone)]
pub enum SocketOption {
    ReuseAddr(bool),
    ReusePort(bool),
    Broadcast(bool),
    KeepAlive(bool),
    RecvBufferSize(usize),
    SendBufferSize(usize),
    RecvTimeout(Option<u64>),
    SendTimeout(Option<u64>),
}

/// Socket table for managing all sockets
static mut SOCKET_TABLE: Option<Vec<Socket>> = None;
static mut NEXT_SOCKET_ID: usize = 1;

/// Initialize socket subsystem
pub fn init() -> Result<(), KernelError> {
    println!("[SOCKET] Initializing socket subsystem...");

    unsafe {
        SOCKET_TABLE = Some(Vec::new());
    }

    println!("[SOCKET] Socket subsystem initialized");
    Ok(())
}

/// Create a new socket and return its ID
pub fn create_socket(
    domain: SocketDomain,
    socket_type: SocketType,
    protocol: SocketProtocol,
) -> Result<usize, KernelError> {
    let mut socket = Socket::new(domain, socket_type, protocol)?;

    unsafe {
        let id = NEXT_SOCKET_ID;
        NEXT_SOCKET_ID += 1;

        socket.id = id;

        if let Some(ref mut table) = SOCKET_TABLE {
            table.push(socket);
            Ok(id)
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

/// Get socket by ID
pub fn get_socket(id: usize) -> Result<&'static Socket, KernelError> {
    unsafe {
        if let Some(ref table) = SOCKET_TABLE {
            table
                .iter()
                .find(|s| s.id == id)
                .ok_or(KernelError::InvalidArgument {
                    name: "socket_id",
                    value: "not_found",
                })
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

/// Get mutable socket by ID
pub fn get_socket_mut(id: usize) -> Result<&'static mut Socket, KernelError> {
    unsafe {
        if let Some(ref mut table) = SOCKET_TABLE {
            table
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(KernelError::InvalidArgument {
                    name: "socket_id",
                    value: "not_found",
                })
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

/// Accept a pending connection on a listening socket, registering a new
/// established socket in the table and returning its id and peer address.
pub fn accept_connection(listening_id: usize) -> Result<(usize, SocketAddr), KernelError> {
    let listener = get_socket(listening_id)?;
    if listener.socket_type != SocketType::Stream {
        return Err(KernelError::InvalidArgument {
            name: "socket_type",
            value: "not_stream",
        });
    }
    if listener.state != SocketState::Listening {
        return Err(KernelError::InvalidState {
            expected: "listening",
            actual: "not_listening",
        });
    }
    let local = listener.local_addr.ok_or(KernelError::InvalidState {
        expected: "bound",
        actual: "unbound",
    })?;

    let (remote, send_next, recv_next) =
        take_pending_connection(local).ok_or(KernelError::WouldBlock)?;

    let mut accepted = Socket::new(
        SocketDomain::Inet,
        SocketType::Stream,
        SocketProtocol::Tcp,
    )?;
    accepted.local_addr = Some(local);
    accepted.remote_addr = Some(remote);
    accepted.state = SocketState::Connected;

    let id = unsafe {
        let id = NEXT_SOCKET_ID;
        NEXT_SOCKET_ID += 1;
        accepted.id = id;

        let table = SOCKET_TABLE.as_mut().ok_or(KernelError::InvalidState {
            expected: "initialized",
            actual: "not_initialized",
        })?;
        table.push(accepted);
        id
    };

    super::tcp::adopt_established(id, local, remote, send_next, recv_next);

    Ok((id, remote))
}

/// Close and remove a socket from the table (used by `close`/`sys_exit`
/// file-table teardown).
pub fn destroy_socket(id: usize) -> Result<(), KernelError> {
    if let Ok(socket) = get_socket(id) {
        if socket.socket_type == SocketType::Stream && socket.state == SocketState::Listening {
            if let Some(local) = socket.local_addr {
                super::tcp::stop_listening(local);
            }
        }
    }
    super::tcp::close_connection(id);
    super::udp::unregister_socket(id);

    unsafe {
        if let Some(ref mut table) = SOCKET_TABLE {
            table.retain(|s| s.id != id);
            Ok(())
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

// ============================================================================
// Extended socket syscalls (Phase 6): sendto, recvfrom, getsockname,
// getpeername, setsockopt, getsockopt, and the accept-queue used by TCP's
// passive-open path.
// ============================================================================

/// A connection whose 3-way handshake the TCP layer completed, but not yet
/// claimed by `accept`. Carries the final sequence numbers so `accept` can
/// adopt it straight into `Established` without replaying the handshake.
struct PendingConnection {
    remote: SocketAddr,
    send_next: u32,
    recv_next: u32,
}

/// Per-listening-socket backlog of pending connections, keyed by the
/// listening socket's local address (TCP has no socket id yet at SYN time).
static PENDING_CONNECTIONS: Mutex<BTreeMap<SocketAddr, Vec<PendingConnection>>> =
    Mutex::new(BTreeMap::new());

/// Queue a handshake the TCP layer just completed against the listening
/// socket bound to `local`. Called from `tcp::complete_handshake`.
pub fn queue_pending_connection(
    local: SocketAddr,
    remote: SocketAddr,
    send_next: u32,
    recv_next: u32,
) -> Result<(), KernelError> {
    let mut pending = PENDING_CONNECTIONS.lock();
    let queue = pending.entry(local).or_insert_with(Vec::new);
    if queue.len() >= 16 {
        return Err(KernelError::ResourceExhausted {
            resource: "tcp_accept_backlog",
        });
    }
    queue.push(PendingConnection {
        remote,
        send_next,
        recv_next,
    });
    Ok(())
}

/// Take the oldest pending connection for a listening socket, if any.
pub fn take_pending_connection(local: SocketAddr) -> Option<(SocketAddr, u32, u32)> {
    let mut pending = PENDING_CONNECTIONS.lock();
    let queue = pending.get_mut(&local)?;
    if queue.is_empty() {
        return None;
    }
    let conn = queue.remove(0);
    Some((conn.remote, conn.send_next, conn.recv_next))
}

/// Send to a specific destination (`sendto`); for a stream socket this is
/// only valid once connected and `dest` must match the peer.
pub fn sendto(id: usize, data: &[u8], dest: Option<&SocketAddr>) -> Result<usize, KernelError> {
    let socket = get_socket(id)?;

    match socket.socket_type {
        SocketType::Dgram => {
            let target = dest.copied().or(socket.remote_addr).ok_or(
                KernelError::InvalidState {
                    expected: "destination address",
                    actual: "none given or connected",
                },
            )?;
            let local = socket
                .local_addr
                .unwrap_or_else(|| SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0));
            super::udp::send_packet(local, target, data)
        }
        SocketType::Stream => socket.send(data, 0),
        SocketType::Raw => Err(KernelError::NotImplemented {
            feature: "raw_socket_sendto",
        }),
    }
}

/// Receive data and the sender's address (`recvfrom`).
pub fn recvfrom(id: usize, buffer: &mut [u8]) -> Result<(usize, Option<SocketAddr>), KernelError> {
    let socket = get_socket(id)?;

    match socket.socket_type {
        SocketType::Dgram => {
            let (n, from) = super::udp::receive_from(id, buffer)?;
            Ok((n, Some(from)))
        }
        SocketType::Stream => {
            let mut buf = Vec::new();
            let n = super::tcp::receive_data(id, &mut buf);
            let copy_len = n.min(buffer.len());
            buffer[..copy_len].copy_from_slice(&buf[..copy_len]);
            Ok((copy_len, socket.remote_addr))
        }
        SocketType::Raw => Err(KernelError::NotImplemented {
            feature: "raw_socket_recvfrom",
        }),
    }
}

/// Return the address this socket is bound to (`getsockname`).
pub fn getsockname(id: usize) -> Result<SocketAddr, KernelError> {
    let socket = get_socket(id)?;
    socket.local_addr.ok_or(KernelError::InvalidState {
        expected: "bound",
        actual: "unbound",
    })
}

/// Return the address this socket is connected to (`getpeername`).
pub fn getpeername(id: usize) -> Result<SocketAddr, KernelError> {
    let socket = get_socket(id)?;
    socket.remote_addr.ok_or(KernelError::InvalidState {
        expected: "connected",
        actual: "not_connected",
    })
}

/// Set a socket option by raw `(level, optname)` pair, matching the handful
/// of options JSOS's libc shim exposes (SOL_SOCKET = 1).
pub fn setsockopt(
    id: usize,
    level: i32,
    optname: i32,
    optval_ptr: usize,
    optlen: usize,
) -> Result<usize, KernelError> {
    const SOL_SOCKET: i32 = 1;
    const SO_REUSEADDR: i32 = 2;
    const SO_KEEPALIVE: i32 = 9;
    const SO_RCVBUF: i32 = 8;
    const SO_SNDBUF: i32 = 7;

    if level != SOL_SOCKET {
        return Err(KernelError::NotImplemented {
            feature: "setsockopt_level",
        });
    }
    if optlen < core::mem::size_of::<u32>() {
        return Err(KernelError::InvalidArgument {
            name: "optlen",
            value: "too_small",
        });
    }

    // SAFETY: caller-validated pointer/length pair from the syscall layer.
    let value = unsafe { *(optval_ptr as *const u32) };
    let socket = get_socket_mut(id)?;

    let option = match optname {
        SO_REUSEADDR => SocketOption::ReuseAddr(value != 0),
        SO_KEEPALIVE => SocketOption::KeepAlive(value != 0),
        SO_RCVBUF => SocketOption::RecvBufferSize(value as usize),
        SO_SNDBUF => SocketOption::SendBufferSize(value as usize),
        _ => {
            return Err(KernelError::NotImplemented {
                feature: "setsockopt_option",
            })
        }
    };

    socket.set_option(option)?;
    Ok(0)
}

/// Read a socket option into `optval_ptr` as a `u32` (`getsockopt`).
pub fn getsockopt(id: usize, level: i32, optname: i32, optval_ptr: usize) -> Result<usize, KernelError> {
    const SOL_SOCKET: i32 = 1;
    const SO_REUSEADDR: i32 = 2;
    const SO_KEEPALIVE: i32 = 9;
    const SO_RCVBUF: i32 = 8;
    const SO_SNDBUF: i32 = 7;

    if level != SOL_SOCKET {
        return Err(KernelError::NotImplemented {
            feature: "getsockopt_level",
        });
    }

    let socket = get_socket(id)?;
    let value: u32 = match optname {
        SO_REUSEADDR => socket.options.reuse_addr as u32,
        SO_KEEPALIVE => socket.options.keepalive as u32,
        SO_RCVBUF => socket.options.recv_buffer_size as u32,
        SO_SNDBUF => socket.options.send_buffer_size as u32,
        _ => {
            return Err(KernelError::NotImplemented {
                feature: "getsockopt_option",
            })
        }
    };

    // SAFETY: caller-validated pointer from the syscall layer (at least
    // 4 bytes).
    unsafe {
        *(optval_ptr as *mut u32) = value;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Address;

    #[test_case]
    fn test_socket_creation() {
        let socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        assert_eq!(socket.state, SocketState::Unbound);
        assert_eq!(socket.socket_type, SocketType::Stream);
    }

    #[test_case]
    fn test_socket_bind() {
        let mut socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        let addr = SocketAddr::v4(Ipv4Address::LOCALHOST, 8080);

        assert_eq!(socket.state, SocketState::Unbound);
        socket.bind(addr).unwrap();
        assert_eq!(socket.state, SocketState::Bound);
        assert_eq!(socket.local_addr, Some(addr));
    }
}

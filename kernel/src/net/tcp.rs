//! TCP protocol implementation: the 11-state connection machine, segment
//! construction/checksum, and the socket-layer glue `net::socket` and
//! `syscall::network` drive.
//!
//! Connections are keyed by socket id once a socket exists for them
//! (`TCP_CONNECTIONS`). Two auxiliary tables cover the gap before that:
//! `LISTENERS` maps a bound local address to the listening socket id, and
//! `HALF_OPEN` tracks a passive-open handshake in flight -- the peer's SYN
//! has been SYN|ACK'd but the final ACK hasn't arrived yet, so there is no
//! socket id to key on until `accept` claims it.

use alloc::{collections::BTreeMap, vec::Vec};

use spin::Mutex;

use super::{ip, IpAddress, SocketAddr};
use crate::error::KernelError;

/// TCP header flags (RFC 793 control bits; CWR/ECE are not implemented).
#[derive(Debug, Clone, Copy)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    pub fn has(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// TCP connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Snapshot of a TCP connection's addressing and state, exposed for
/// diagnostics (`get_stats`, a future `/proc/net/tcp`-style `procfs` entry).
#[derive(Debug, Clone)]
pub struct TcpConnection {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub state: TcpState,
    pub seq_num: u32,
    pub ack_num: u32,
    pub window_size: u16,
}

impl TcpConnection {
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local,
            remote,
            state: TcpState::Closed,
            seq_num: 0,
            ack_num: 0,
            window_size: 65535,
        }
    }
}

/// Fixed 20-byte TCP header (no options).
#[derive(Debug, Clone, Copy)]
struct TcpHeader {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    checksum: u16,
}

impl TcpHeader {
    const SIZE: usize = 20;

    fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: u8, window: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window,
            checksum: 0,
        }
    }

    fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.seq.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.ack.to_be_bytes());
        bytes[12] = 5 << 4; // data offset: 5 words, no options, reserved bits zero
        bytes[13] = self.flags;
        bytes[14..16].copy_from_slice(&self.window.to_be_bytes());
        bytes[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        // bytes[18..20] urgent pointer, unused, left zero
        bytes
    }

    /// Parse a header, returning it along with the header length in bytes
    /// (accounts for a nonzero options section even though this stack never
    /// emits one).
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), KernelError> {
        if bytes.len() < Self::SIZE {
            return Err(KernelError::InvalidArgument {
                name: "tcp_header",
                value: "too_short",
            });
        }

        let data_offset_words = (bytes[12] >> 4) as usize;
        let header_len = data_offset_words * 4;
        if header_len < Self::SIZE || header_len > bytes.len() {
            return Err(KernelError::InvalidArgument {
                name: "tcp_header",
                value: "bad_data_offset",
            });
        }

        Ok((
            Self {
                src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
                dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
                seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
                ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
                flags: bytes[13],
                window: u16::from_be_bytes([bytes[14], bytes[15]]),
                checksum: u16::from_be_bytes([bytes[16], bytes[17]]),
            },
            header_len,
        ))
    }

    /// TCP checksum: IPv4 pseudo-header (src, dst, zero, protocol=6,
    /// length) plus the header and payload, ones'-complement folded.
    fn calculate_checksum(&mut self, src: IpAddress, dst: IpAddress, payload: &[u8]) {
        self.checksum = 0;
        let mut sum: u32 = 0;

        if let (IpAddress::V4(src_v4), IpAddress::V4(dst_v4)) = (src, dst) {
            sum += u16::from_be_bytes([src_v4.0[0], src_v4.0[1]]) as u32;
            sum += u16::from_be_bytes([src_v4.0[2], src_v4.0[3]]) as u32;
            sum += u16::from_be_bytes([dst_v4.0[0], dst_v4.0[1]]) as u32;
            sum += u16::from_be_bytes([dst_v4.0[2], dst_v4.0[3]]) as u32;
            sum += 6u32; // protocol: TCP
            sum += (Self::SIZE + payload.len()) as u32;
        }

        let header_bytes = self.to_bytes();
        for chunk in header_bytes.chunks(2) {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }

        for chunk in payload.chunks(2) {
            if chunk.len() == 2 {
                sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
            } else {
                sum += (chunk[0] as u32) << 8;
            }
        }

        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        self.checksum = !(sum as u16);
    }
}

/// Active/closing connection state, keyed by socket id.
struct TcpSocketState {
    connection: TcpConnection,
    recv_buffer: Vec<u8>,
    /// SND.NXT: next new sequence number this side will use.
    send_next: u32,
    /// RCV.NXT: next sequence number expected from the peer.
    recv_next: u32,
    /// Uptime (ms) this connection entered `TimeWait`, for `tick` to expire it.
    time_wait_since_ms: u64,
}

/// A passive-open handshake that has been SYN|ACK'd but not yet completed.
struct HalfOpen {
    server_isn: u32,
    recv_next: u32,
}

/// How long a connection stays in `TimeWait` before `tick` reaps it.
///
/// A real stack uses 2*MSL (conventionally 60s-240s); this is shortened
/// since JSOS has no long-haul networks to guard against duplicate
/// late segments from.
const TIME_WAIT_MS: u64 = 2_000;

static TCP_CONNECTIONS: Mutex<BTreeMap<usize, TcpSocketState>> = Mutex::new(BTreeMap::new());
static LISTENERS: Mutex<BTreeMap<SocketAddr, usize>> = Mutex::new(BTreeMap::new());
static HALF_OPEN: Mutex<BTreeMap<(SocketAddr, SocketAddr), HalfOpen>> = Mutex::new(BTreeMap::new());

/// Initialize TCP.
pub fn init() -> Result<(), KernelError> {
    println!("[TCP] Initializing TCP protocol...");
    println!("[TCP] TCP initialized");
    Ok(())
}

fn generate_initial_seq() -> u32 {
    // A real stack derives this from a hash of the 4-tuple plus a clock tick
    // (RFC 6528); a plain counter is enough here since JSOS has no adversary
    // to defend against sequence-number guessing.
    static COUNTER: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(1_000_000);
    COUNTER.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
}

fn send_segment(
    local: SocketAddr,
    remote: SocketAddr,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) -> Result<(), KernelError> {
    let mut header = TcpHeader::new(local.port(), remote.port(), seq, ack, flags, 65535);
    header.calculate_checksum(local.ip(), remote.ip(), payload);

    let mut segment = Vec::with_capacity(TcpHeader::SIZE + payload.len());
    segment.extend_from_slice(&header.to_bytes());
    segment.extend_from_slice(payload);

    ip::send(remote.ip(), ip::IpProtocol::Tcp, &segment)
}

/// Mark `socket_id` as listening on `local` (passive open).
pub fn listen(socket_id: usize, local: SocketAddr) -> Result<(), KernelError> {
    let mut listeners = LISTENERS.lock();
    if listeners.contains_key(&local) {
        return Err(KernelError::AlreadyExists {
            resource: "tcp_listener",
            id: local.port() as u64,
        });
    }
    listeners.insert(local, socket_id);
    Ok(())
}

/// Stop listening on `local` (socket closed or destroyed while listening).
pub fn stop_listening(local: SocketAddr) {
    LISTENERS.lock().remove(&local);
}

/// Active open: allocate an ISN, record `SynSent`, and send the initial SYN.
pub fn connect(socket_id: usize, local: SocketAddr, remote: SocketAddr) -> Result<(), KernelError> {
    let isn = generate_initial_seq();

    let mut connections = TCP_CONNECTIONS.lock();
    if connections.contains_key(&socket_id) {
        return Err(KernelError::AlreadyExists {
            resource: "tcp_connection",
            id: socket_id as u64,
        });
    }

    let mut connection = TcpConnection::new(local, remote);
    connection.state = TcpState::SynSent;
    connection.seq_num = isn;

    connections.insert(
        socket_id,
        TcpSocketState {
            connection,
            recv_buffer: Vec::new(),
            send_next: isn.wrapping_add(1),
            recv_next: 0,
            time_wait_since_ms: 0,
        },
    );
    drop(connections);

    send_segment(local, remote, isn, 0, TcpFlags::SYN, &[])
}

/// Adopt a handshake completed in `HALF_OPEN` into a freshly allocated
/// socket id, as `Established`. Called by `net::socket::accept_connection`.
pub fn adopt_established(
    socket_id: usize,
    local: SocketAddr,
    remote: SocketAddr,
    send_next: u32,
    recv_next: u32,
) {
    let mut connection = TcpConnection::new(local, remote);
    connection.state = TcpState::Established;
    connection.seq_num = send_next;
    connection.ack_num = recv_next;

    TCP_CONNECTIONS.lock().insert(
        socket_id,
        TcpSocketState {
            connection,
            recv_buffer: Vec::new(),
            send_next,
            recv_next,
            time_wait_since_ms: 0,
        },
    );
}

/// Whether `socket_id` has a fully established connection (used by `send`/
/// `recv` to distinguish a socket still mid-handshake from one ready for
/// data).
pub fn is_established(socket_id: usize) -> bool {
    matches!(
        TCP_CONNECTIONS.lock().get(&socket_id).map(|s| s.connection.state),
        Some(TcpState::Established) | Some(TcpState::CloseWait)
    )
}

/// Send data on an established (or half-closed-by-peer) connection.
pub fn transmit_data(socket_id: usize, data: &[u8]) -> Result<usize, KernelError> {
    let (local, remote, seq, ack) = {
        let mut connections = TCP_CONNECTIONS.lock();
        let state = connections
            .get_mut(&socket_id)
            .ok_or(KernelError::NotFound {
                resource: "tcp_connection",
                id: socket_id as u64,
            })?;

        if !matches!(
            state.connection.state,
            TcpState::Established | TcpState::CloseWait
        ) {
            return Err(KernelError::InvalidState {
                expected: "established",
                actual: "other",
            });
        }

        let seq = state.send_next;
        state.send_next = seq.wrapping_add(data.len() as u32);
        (
            state.connection.local,
            state.connection.remote,
            seq,
            state.recv_next,
        )
    };

    send_segment(local, remote, seq, ack, TcpFlags::ACK | TcpFlags::PSH, data)?;
    Ok(data.len())
}

/// Drain reassembled in-order bytes for `socket_id` into `buffer`.
pub fn receive_data(socket_id: usize, buffer: &mut Vec<u8>) -> usize {
    let mut connections = TCP_CONNECTIONS.lock();
    let Some(state) = connections.get_mut(&socket_id) else {
        return 0;
    };

    if state.recv_buffer.is_empty() {
        return 0;
    }

    buffer.extend_from_slice(&state.recv_buffer);
    let n = state.recv_buffer.len();
    state.recv_buffer.clear();
    n
}

/// Begin (or finish) closing a connection. Listening sockets stop accepting
/// new connections; established ones send a FIN and enter the close
/// sequence; anything else is dropped outright.
pub fn close_connection(socket_id: usize) {
    let action = {
        let mut connections = TCP_CONNECTIONS.lock();
        let Some(state) = connections.get_mut(&socket_id) else {
            return;
        };

        match state.connection.state {
            TcpState::Established => {
                let seq = state.send_next;
                let ack = state.recv_next;
                state.send_next = seq.wrapping_add(1);
                state.connection.state = TcpState::FinWait1;
                Some((state.connection.local, state.connection.remote, seq, ack))
            }
            TcpState::CloseWait => {
                let seq = state.send_next;
                let ack = state.recv_next;
                state.send_next = seq.wrapping_add(1);
                state.connection.state = TcpState::LastAck;
                Some((state.connection.local, state.connection.remote, seq, ack))
            }
            _ => {
                connections.remove(&socket_id);
                None
            }
        }
    };

    if let Some((local, remote, seq, ack)) = action {
        let _ = send_segment(local, remote, seq, ack, TcpFlags::FIN | TcpFlags::ACK, &[]);
    }
}

/// What to send in response to an incoming segment, decided while holding
/// the connection table's lock and sent once it's released.
enum Response {
    None,
    Segment {
        local: SocketAddr,
        remote: SocketAddr,
        seq: u32,
        ack: u32,
        flags: u8,
    },
}

fn send_response(response: Response) -> Result<(), KernelError> {
    match response {
        Response::None => Ok(()),
        Response::Segment {
            local,
            remote,
            seq,
            ack,
            flags,
        } => send_segment(local, remote, seq, ack, flags, &[]),
    }
}

/// Drive state transitions for a connection already in `TCP_CONNECTIONS`.
/// Returns `None` if no connection in the table matches this 4-tuple.
fn update_existing_connection(
    local: SocketAddr,
    remote: SocketAddr,
    header: &TcpHeader,
    flags: &TcpFlags,
    payload: &[u8],
) -> Option<Response> {
    let mut connections = TCP_CONNECTIONS.lock();
    let state = connections
        .values_mut()
        .find(|s| s.connection.local == local && s.connection.remote == remote)?;

    if flags.has(TcpFlags::RST) {
        state.connection.state = TcpState::Closed;
        return Some(Response::None);
    }

    let response = match state.connection.state {
        TcpState::SynSent => {
            if flags.has(TcpFlags::SYN)
                && flags.has(TcpFlags::ACK)
                && header.ack == state.send_next
            {
                state.recv_next = header.seq.wrapping_add(1);
                state.connection.state = TcpState::Established;
                Response::Segment {
                    local,
                    remote,
                    seq: state.send_next,
                    ack: state.recv_next,
                    flags: TcpFlags::ACK,
                }
            } else {
                Response::None
            }
        }
        TcpState::Established | TcpState::CloseWait => {
            let mut gained_data = false;
            if header.seq == state.recv_next && !payload.is_empty() {
                state.recv_buffer.extend_from_slice(payload);
                state.recv_next = state.recv_next.wrapping_add(payload.len() as u32);
                gained_data = true;
            }

            if flags.has(TcpFlags::FIN) {
                state.recv_next = state.recv_next.wrapping_add(1);
                state.connection.state = TcpState::CloseWait;
                Response::Segment {
                    local,
                    remote,
                    seq: state.send_next,
                    ack: state.recv_next,
                    flags: TcpFlags::ACK,
                }
            } else if gained_data {
                Response::Segment {
                    local,
                    remote,
                    seq: state.send_next,
                    ack: state.recv_next,
                    flags: TcpFlags::ACK,
                }
            } else {
                Response::None
            }
        }
        TcpState::FinWait1 => {
            let fin_acked = flags.has(TcpFlags::ACK) && header.ack == state.send_next;
            if flags.has(TcpFlags::FIN) {
                state.recv_next = header.seq.wrapping_add(1);
                state.connection.state = if fin_acked {
                    state.time_wait_since_ms = crate::timer::get_uptime_ms();
                    TcpState::TimeWait
                } else {
                    TcpState::Closing
                };
                Response::Segment {
                    local,
                    remote,
                    seq: state.send_next,
                    ack: state.recv_next,
                    flags: TcpFlags::ACK,
                }
            } else {
                if fin_acked {
                    state.connection.state = TcpState::FinWait2;
                }
                Response::None
            }
        }
        TcpState::FinWait2 => {
            if flags.has(TcpFlags::FIN) {
                state.recv_next = header.seq.wrapping_add(1);
                state.connection.state = TcpState::TimeWait;
                state.time_wait_since_ms = crate::timer::get_uptime_ms();
                Response::Segment {
                    local,
                    remote,
                    seq: state.send_next,
                    ack: state.recv_next,
                    flags: TcpFlags::ACK,
                }
            } else {
                Response::None
            }
        }
        TcpState::Closing => {
            if flags.has(TcpFlags::ACK) && header.ack == state.send_next {
                state.connection.state = TcpState::TimeWait;
                state.time_wait_since_ms = crate::timer::get_uptime_ms();
            }
            Response::None
        }
        TcpState::LastAck => {
            if flags.has(TcpFlags::ACK) && header.ack == state.send_next {
                state.connection.state = TcpState::Closed;
            }
            Response::None
        }
        _ => Response::None,
    };

    Some(response)
}

/// Check whether this segment completes a passive-open handshake recorded
/// in `HALF_OPEN`, and hand it to the accept backlog if so.
fn complete_handshake(local: SocketAddr, remote: SocketAddr, header: &TcpHeader, flags: &TcpFlags) -> bool {
    if !flags.has(TcpFlags::ACK) || flags.has(TcpFlags::SYN) {
        return false;
    }

    let mut half_open = HALF_OPEN.lock();
    let key = (local, remote);
    let Some(entry) = half_open.get(&key) else {
        return false;
    };
    if header.ack != entry.server_isn.wrapping_add(1) || header.seq != entry.recv_next {
        return false;
    }

    let send_next = entry.server_isn.wrapping_add(1);
    let recv_next = entry.recv_next;
    half_open.remove(&key);
    drop(half_open);

    if let Err(_e) = super::socket::queue_pending_connection(local, remote, send_next, recv_next) {
        #[cfg(feature = "net_debug")]
        println!("[TCP] accept backlog full, dropping completed handshake: {:?}", _e);
    }
    true
}

/// Handle a bare SYN against a listening socket (or RST it if unlistened).
fn handle_passive_open(local: SocketAddr, remote: SocketAddr, client_isn: u32) -> Result<(), KernelError> {
    if !LISTENERS.lock().contains_key(&local) {
        let ack = client_isn.wrapping_add(1);
        return send_segment(local, remote, 0, ack, TcpFlags::RST | TcpFlags::ACK, &[]);
    }

    let server_isn = generate_initial_seq();
    let recv_next = client_isn.wrapping_add(1);
    HALF_OPEN
        .lock()
        .insert((local, remote), HalfOpen { server_isn, recv_next });

    send_segment(local, remote, server_isn, recv_next, TcpFlags::SYN | TcpFlags::ACK, &[])
}

/// Process an incoming TCP segment (called by `ethernet::dispatch_frame` via
/// the IP layer).
pub fn process_packet(src_addr: IpAddress, dst_addr: IpAddress, data: &[u8]) -> Result<(), KernelError> {
    let (header, header_len) = TcpHeader::from_bytes(data)?;
    let flags = TcpFlags::new(header.flags);
    let payload = &data[header_len..];
    let remote = SocketAddr::new(src_addr, header.src_port);
    let local = SocketAddr::new(dst_addr, header.dst_port);

    let result = if let Some(response) = update_existing_connection(local, remote, &header, &flags, payload) {
        send_response(response)
    } else if complete_handshake(local, remote, &header, &flags) {
        Ok(())
    } else if flags.has(TcpFlags::SYN) && !flags.has(TcpFlags::ACK) {
        handle_passive_open(local, remote, header.seq)
    } else if !flags.has(TcpFlags::RST) {
        let ack = header.seq.wrapping_add(payload.len().max(1) as u32);
        send_segment(local, remote, 0, ack, TcpFlags::RST | TcpFlags::ACK, &[])
    } else {
        Ok(())
    };

    reap_closed();
    result
}

fn reap_closed() {
    TCP_CONNECTIONS
        .lock()
        .retain(|_, state| state.connection.state != TcpState::Closed);
}

/// Expire connections that have sat in `TimeWait` past `TIME_WAIT_MS`.
/// Driven periodically from `net::tick`, not a dedicated per-connection
/// timer, since timer-wheel callbacks are plain `fn` pointers with no room
/// to carry a connection id.
pub fn tick() {
    let now = crate::timer::get_uptime_ms();
    TCP_CONNECTIONS.lock().retain(|_, state| {
        if state.connection.state == TcpState::TimeWait {
            now.saturating_sub(state.time_wait_since_ms) < TIME_WAIT_MS
        } else {
            true
        }
    });
}

/// Get connection statistics.
pub fn get_stats() -> TcpStats {
    let connections = TCP_CONNECTIONS.lock();
    TcpStats {
        active_connections: connections.len(),
    }
}

/// TCP statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpStats {
    pub active_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Address;

    #[test_case]
    fn test_tcp_flags() {
        let mut flags = TcpFlags::new(0);
        flags.set(TcpFlags::SYN);
        assert!(flags.has(TcpFlags::SYN));
        assert!(!flags.has(TcpFlags::ACK));
    }

    #[test_case]
    fn test_tcp_connection() {
        let local = SocketAddr::v4(Ipv4Address::LOCALHOST, 8080);
        let remote = SocketAddr::v4(Ipv4Address::new(192, 168, 1, 1), 80);
        let conn = TcpConnection::new(local, remote);

        assert_eq!(conn.state, TcpState::Closed);
    }

    #[test_case]
    fn test_tcp_header_roundtrip() {
        let mut header = TcpHeader::new(1234, 80, 1_000_000, 0, TcpFlags::SYN, 65535);
        header.calculate_checksum(
            IpAddress::V4(Ipv4Address::new(10, 0, 2, 15)),
            IpAddress::V4(Ipv4Address::new(10, 0, 2, 2)),
            &[],
        );
        let bytes = header.to_bytes();
        let (parsed, header_len) = TcpHeader::from_bytes(&bytes).unwrap();

        assert_eq!(header_len, TcpHeader::SIZE);
        assert_eq!(parsed.src_port, 1234);
        assert_eq!(parsed.dst_port, 80);
        assert_eq!(parsed.seq, 1_000_000);
        assert!(TcpFlags::new(parsed.flags).has(TcpFlags::SYN));
        assert_eq!(parsed.checksum, header.checksum);
    }

    #[test_case]
    fn test_connect_records_syn_sent() {
        let local = SocketAddr::v4(Ipv4Address::new(10, 0, 2, 15), 40000);
        let remote = SocketAddr::v4(Ipv4Address::new(10, 0, 2, 2), 80);
        // socket id 999_999 is unique to this test, avoiding collisions with
        // whatever else runs in the shared global tables.
        let _ = connect(999_999, local, remote);
        assert!(TCP_CONNECTIONS
            .lock()
            .get(&999_999)
            .is_some_and(|s| s.connection.state == TcpState::SynSent));
        close_connection(999_999);
    }
}

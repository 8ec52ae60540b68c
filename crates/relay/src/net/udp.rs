use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::reliability::{ReliableReceiver, ReliableSender};
use super::stats::NetworkStats;
use super::transport::{Channel, ConnectionId, Transport, TransportError, TransportEvent};

/// Largest UDP payload an IPv4 datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;
/// Frame type alone. An unreliable datagram is this plus the message.
pub const UNRELIABLE_HEADER_LEN: usize = 1;
/// Frame type plus reliable sequence.
pub const RELIABLE_HEADER_LEN: usize = 5;
const RECV_BUFFER_LEN: usize = 65_536;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UdpConfig {
    pub resend_interval_ms: u64,
    pub idle_timeout_secs: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            resend_interval_ms: 100,
            idle_timeout_secs: 30,
            heartbeat_interval_ms: 1000,
        }
    }
}

impl UdpConfig {
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Transport-level framing wrapped around every datagram. The framing is not
/// counted against `ReplicationConfig::max_payload`; a message of that size
/// goes out as `max_payload + UNRELIABLE_HEADER_LEN` bytes on the unreliable
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Connect,
    Accept,
    Disconnect,
    Unreliable(Bytes),
    Reliable { sequence: u32, payload: Bytes },
    Ack(u32),
    Heartbeat,
}

impl Frame {
    const CONNECT: u8 = 1;
    const ACCEPT: u8 = 2;
    const DISCONNECT: u8 = 3;
    const UNRELIABLE: u8 = 4;
    const RELIABLE: u8 = 5;
    const ACK: u8 = 6;
    const HEARTBEAT: u8 = 7;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self {
            Self::Connect => buf.put_u8(Self::CONNECT),
            Self::Accept => buf.put_u8(Self::ACCEPT),
            Self::Disconnect => buf.put_u8(Self::DISCONNECT),
            Self::Unreliable(payload) => {
                buf.put_u8(Self::UNRELIABLE);
                buf.put_slice(payload);
            }
            Self::Reliable { sequence, payload } => {
                buf.put_u8(Self::RELIABLE);
                buf.put_u32_le(*sequence);
                buf.put_slice(payload);
            }
            Self::Ack(sequence) => {
                buf.put_u8(Self::ACK);
                buf.put_u32_le(*sequence);
            }
            Self::Heartbeat => buf.put_u8(Self::HEARTBEAT),
        }
        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Option<Self> {
        if !data.has_remaining() {
            return None;
        }
        let frame = match data.get_u8() {
            Self::CONNECT => Self::Connect,
            Self::ACCEPT => Self::Accept,
            Self::DISCONNECT => Self::Disconnect,
            Self::UNRELIABLE => Self::Unreliable(data),
            Self::RELIABLE if data.remaining() >= 4 => {
                let sequence = data.get_u32_le();
                Self::Reliable {
                    sequence,
                    payload: data,
                }
            }
            Self::ACK if data.remaining() >= 4 => Self::Ack(data.get_u32_le()),
            Self::HEARTBEAT => Self::Heartbeat,
            _ => return None,
        };
        Some(frame)
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Unreliable(payload) => UNRELIABLE_HEADER_LEN + payload.len(),
            Self::Reliable { payload, .. } => RELIABLE_HEADER_LEN + payload.len(),
            Self::Ack(_) => 5,
            _ => 1,
        }
    }
}

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    sender: ReliableSender,
    receiver: ReliableReceiver,
    last_receive: Instant,
    last_send: Instant,
}

impl Peer {
    fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            sender: ReliableSender::new(),
            receiver: ReliableReceiver::new(),
            last_receive: now,
            last_send: now,
        }
    }

    fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_receive) > timeout
    }
}

/// Server end of the UDP transport: one non-blocking socket, one [`Peer`]
/// per remote address.
///
/// Reliable frames larger than the path MTU rely on IP fragmentation.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peers: HashMap<ConnectionId, Peer>,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    next_id: u32,
    max_clients: usize,
    config: UdpConfig,
    stats: NetworkStats,
    recv_buffer: Box<[u8]>,
    closed: bool,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        max_clients: usize,
        config: UdpConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            next_id: 1,
            max_clients,
            config,
            stats: NetworkStats::default(),
            recv_buffer: vec![0u8; RECV_BUFFER_LEN].into_boxed_slice(),
            closed: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.peers.get(&conn).map(|peer| peer.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    fn handle_frame(
        &mut self,
        frame: Frame,
        addr: SocketAddr,
        now: Instant,
        events: &mut Vec<TransportEvent>,
    ) {
        let Some(&id) = self.by_addr.get(&addr) else {
            if frame == Frame::Connect {
                self.accept(addr, now, events);
            } else {
                log::debug!("Ignoring {frame:?} from unconnected {addr}");
            }
            return;
        };

        if frame == Frame::Disconnect {
            self.remove_peer(id);
            log::info!("{id} ({addr}) disconnected");
            events.push(TransportEvent::Disconnected(id));
            return;
        }

        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        peer.last_receive = now;

        match frame {
            Frame::Connect => {
                // The accept was lost; answer again.
                send_frame(&self.socket, &mut self.stats, &Frame::Accept, addr);
            }
            Frame::Unreliable(payload) => events.push(TransportEvent::Message(id, payload)),
            Frame::Reliable { sequence, payload } => {
                for payload in peer.receiver.accept(sequence, payload) {
                    events.push(TransportEvent::Message(id, payload));
                }
                if let Some(ack) = peer.receiver.ack() {
                    send_frame(&self.socket, &mut self.stats, &Frame::Ack(ack), addr);
                    peer.last_send = now;
                }
            }
            Frame::Ack(sequence) => {
                peer.sender.acknowledge(sequence, now);
            }
            Frame::Accept | Frame::Heartbeat | Frame::Disconnect => {}
        }
    }

    fn accept(&mut self, addr: SocketAddr, now: Instant, events: &mut Vec<TransportEvent>) {
        if self.peers.len() >= self.max_clients {
            log::warn!("Rejecting {addr}: server full ({} clients)", self.max_clients);
            send_frame(&self.socket, &mut self.stats, &Frame::Disconnect, addr);
            return;
        }

        let id = ConnectionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.peers.insert(id, Peer::new(addr, now));
        self.by_addr.insert(addr, id);

        send_frame(&self.socket, &mut self.stats, &Frame::Accept, addr);
        log::info!("{id} connected from {addr}");
        events.push(TransportEvent::Connected(id));
    }

    fn remove_peer(&mut self, id: ConnectionId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        self.by_addr.remove(&peer.addr);
        Some(peer)
    }

    fn expire_idle(&mut self, now: Instant, events: &mut Vec<TransportEvent>) {
        let timeout = self.config.idle_timeout();
        let timed_out: Vec<ConnectionId> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_timed_out(now, timeout))
            .map(|(&id, _)| id)
            .collect();

        for id in timed_out {
            if let Some(peer) = self.remove_peer(id) {
                log::info!("{id} ({}) timed out", peer.addr);
                events.push(TransportEvent::Disconnected(id));
            }
        }
    }

    fn refresh_rtt(&mut self) {
        if self.peers.is_empty() {
            return;
        }
        let count = self.peers.len() as f32;
        self.stats.rtt_ms = self.peers.values().map(|p| p.sender.srtt()).sum::<f32>() / count;
        self.stats.rtt_variance =
            self.peers.values().map(|p| p.sender.rtt_var()).sum::<f32>() / count;
    }
}

fn send_frame(
    socket: &UdpSocket,
    stats: &mut NetworkStats,
    frame: &Frame,
    addr: SocketAddr,
) -> bool {
    match socket.send_to(&frame.encode(), addr) {
        Ok(bytes) => {
            stats.record_sent(bytes);
            true
        }
        Err(e) => {
            log::warn!("Send to {addr} failed: {e}");
            false
        }
    }
}

impl Transport for UdpTransport {
    fn receive(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let now = Instant::now();
        let mut events = Vec::new();

        loop {
            let (size, addr) = match self.socket.recv_from(&mut self.recv_buffer) {
                Ok(received) => received,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from a vanished peer surfaces here on some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            };

            self.stats.record_received(size);
            let data = Bytes::copy_from_slice(&self.recv_buffer[..size]);
            match Frame::decode(data) {
                Some(frame) => self.handle_frame(frame, addr, now, &mut events),
                None => log::debug!("Dropping malformed frame from {addr}"),
            }
        }

        self.expire_idle(now, &mut events);
        Ok(events)
    }

    fn send(
        &mut self,
        conn: ConnectionId,
        channel: Channel,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let max = MAX_DATAGRAM - RELIABLE_HEADER_LEN;
        if payload.len() > max {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        let peer = self
            .peers
            .get_mut(&conn)
            .ok_or(TransportError::UnknownConnection(conn))?;
        let now = Instant::now();

        let frame = match channel {
            Channel::Unreliable => Frame::Unreliable(payload),
            Channel::ReliableOrdered => {
                let sequence = peer.sender.push(payload.clone(), now);
                Frame::Reliable { sequence, payload }
            }
        };

        let data = frame.encode();
        let bytes = self.socket.send_to(&data, peer.addr)?;
        self.stats.record_sent(bytes);
        peer.last_send = now;
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        if let Some(peer) = self.remove_peer(conn) {
            send_frame(&self.socket, &mut self.stats, &Frame::Disconnect, peer.addr);
            log::info!("{conn} ({}) dropped by server", peer.addr);
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let now = Instant::now();
        let resend_interval = self.config.resend_interval();
        let heartbeat_interval = self.config.heartbeat_interval();

        for peer in self.peers.values_mut() {
            for (sequence, payload) in peer.sender.due(now, resend_interval) {
                let frame = Frame::Reliable { sequence, payload };
                if send_frame(&self.socket, &mut self.stats, &frame, peer.addr) {
                    self.stats.packets_resent += 1;
                    peer.last_send = now;
                }
            }
            if now.duration_since(peer.last_send) >= heartbeat_interval
                && send_frame(&self.socket, &mut self.stats, &Frame::Heartbeat, peer.addr)
            {
                peer.last_send = now;
            }
        }

        self.refresh_rtt();
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        for (_, peer) in self.peers.drain() {
            send_frame(&self.socket, &mut self.stats, &Frame::Disconnect, peer.addr);
        }
        self.by_addr.clear();
        self.closed = true;
        log::info!("UDP transport on {} closed", self.local_addr);
    }

    fn stats(&self) -> NetworkStats {
        self.stats.clone()
    }
}

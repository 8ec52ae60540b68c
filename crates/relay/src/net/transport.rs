use std::collections::HashSet;
use std::io;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::stats::NetworkStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    ReliableOrdered,
    Unreliable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Message(ConnectionId, Bytes),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("transport closed")]
    Closed,
}

/// The socket collaborator the tick driver drains and flushes once per tick.
pub trait Transport {
    /// Everything that arrived since the last call, in arrival order.
    fn receive(&mut self) -> Result<Vec<TransportEvent>, TransportError>;

    fn send(
        &mut self,
        conn: ConnectionId,
        channel: Channel,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    /// Drops a connection from the server side. No `Disconnected` event is
    /// produced for it.
    fn disconnect(&mut self, conn: ConnectionId);

    /// Pushes out anything buffered (resends, heartbeats).
    fn flush(&mut self) -> Result<(), TransportError>;

    fn close(&mut self);

    fn stats(&self) -> NetworkStats;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Delivery {
        conn: ConnectionId,
        channel: Channel,
        payload: Bytes,
    },
    Kicked(ConnectionId),
    Closed,
}

/// In-process transport. The server end implements [`Transport`]; the
/// [`LoopbackHandle`] end plays every client at once and may live on another
/// thread.
pub struct LoopbackTransport {
    inbound: Receiver<TransportEvent>,
    outbound: Sender<Outbound>,
    connected: HashSet<ConnectionId>,
    stats: NetworkStats,
    closed: bool,
}

#[derive(Clone)]
pub struct LoopbackHandle {
    inbound: Sender<TransportEvent>,
    outbound: Receiver<Outbound>,
}

impl LoopbackTransport {
    pub fn pair() -> (Self, LoopbackHandle) {
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let transport = Self {
            inbound: in_rx,
            outbound: out_tx,
            connected: HashSet::new(),
            stats: NetworkStats::default(),
            closed: false,
        };
        let handle = LoopbackHandle {
            inbound: in_tx,
            outbound: out_rx,
        };
        (transport, handle)
    }

    pub fn is_connected(&self, conn: ConnectionId) -> bool {
        self.connected.contains(&conn)
    }
}

impl Transport for LoopbackTransport {
    fn receive(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let mut events = Vec::new();
        loop {
            match self.inbound.try_recv() {
                Ok(event) => {
                    match &event {
                        TransportEvent::Connected(conn) => {
                            self.connected.insert(*conn);
                        }
                        TransportEvent::Disconnected(conn) => {
                            self.connected.remove(conn);
                        }
                        TransportEvent::Message(_, payload) => {
                            self.stats.record_received(payload.len());
                        }
                    }
                    events.push(event);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
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
        if !self.connected.contains(&conn) {
            return Err(TransportError::UnknownConnection(conn));
        }

        self.stats.record_sent(payload.len());
        // A dropped handle means nobody is listening; the datagram is lost.
        let _ = self.outbound.send(Outbound::Delivery {
            conn,
            channel,
            payload,
        });
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        if self.connected.remove(&conn) {
            let _ = self.outbound.send(Outbound::Kicked(conn));
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.connected.clear();
            let _ = self.outbound.send(Outbound::Closed);
        }
    }

    fn stats(&self) -> NetworkStats {
        self.stats.clone()
    }
}

impl LoopbackHandle {
    pub fn connect(&self, conn: ConnectionId) {
        let _ = self.inbound.send(TransportEvent::Connected(conn));
    }

    pub fn disconnect(&self, conn: ConnectionId) {
        let _ = self.inbound.send(TransportEvent::Disconnected(conn));
    }

    pub fn send(&self, conn: ConnectionId, payload: Bytes) {
        let _ = self.inbound.send(TransportEvent::Message(conn, payload));
    }

    /// Everything the server has emitted since the last drain.
    pub fn drain(&self) -> Vec<Outbound> {
        self.outbound.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_drained_in_order() {
        let (mut transport, handle) = LoopbackTransport::pair();
        handle.connect(ConnectionId(1));
        handle.send(ConnectionId(1), Bytes::from_static(b"hi"));
        handle.disconnect(ConnectionId(1));

        let events = transport.receive().unwrap();
        assert_eq!(
            events,
            vec![
                TransportEvent::Connected(ConnectionId(1)),
                TransportEvent::Message(ConnectionId(1), Bytes::from_static(b"hi")),
                TransportEvent::Disconnected(ConnectionId(1)),
            ]
        );
        assert!(transport.receive().unwrap().is_empty());
    }

    #[test]
    fn send_requires_known_connection() {
        let (mut transport, handle) = LoopbackTransport::pair();
        let payload = Bytes::from_static(b"x");
        assert!(matches!(
            transport.send(ConnectionId(4), Channel::Unreliable, payload.clone()),
            Err(TransportError::UnknownConnection(ConnectionId(4)))
        ));

        handle.connect(ConnectionId(4));
        transport.receive().unwrap();
        transport
            .send(ConnectionId(4), Channel::Unreliable, payload.clone())
            .unwrap();

        assert_eq!(
            handle.drain(),
            vec![Outbound::Delivery {
                conn: ConnectionId(4),
                channel: Channel::Unreliable,
                payload,
            }]
        );
        assert_eq!(transport.stats().packets_sent, 1);
    }

    #[test]
    fn close_rejects_further_traffic() {
        let (mut transport, handle) = LoopbackTransport::pair();
        handle.connect(ConnectionId(1));
        transport.receive().unwrap();
        transport.close();

        assert!(matches!(transport.receive(), Err(TransportError::Closed)));
        assert_eq!(handle.drain(), vec![Outbound::Closed]);
    }
}

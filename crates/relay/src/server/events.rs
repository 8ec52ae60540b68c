use crate::net::{ConnectionId, ProtocolError};
use crate::registry::PlayerId;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        conn: ConnectionId,
        player: PlayerId,
    },
    ClientDisconnected {
        conn: ConnectionId,
        player: PlayerId,
        reason: DisconnectReason,
    },
    ConnectionRejected {
        conn: ConnectionId,
        reason: String,
    },
    ProtocolError {
        conn: ConnectionId,
        error: ProtocolError,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Kicked => "kicked",
        }
    }
}

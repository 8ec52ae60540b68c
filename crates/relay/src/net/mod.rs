mod codec;
mod protocol;
mod reliability;
mod stats;
mod transport;
mod udp;

pub use codec::{FULL_BODY_STATE_LEN, INPUT_STATE_LEN, POSE_LEN};
pub use protocol::{
    AVATAR_ITEM_LEN, AvatarEntry, BODY_ITEM_LEN, BodyEntry, ClientInput, DEFAULT_PORT,
    DEFAULT_TICK_RATE, INPUT_ITEM_LEN, InputEntry, JoinPlayer, JoinResponse, MAX_PAYLOAD, Message,
    MessageKind, Pose, ProtocolError, STATE_UPDATE_HEADER_LEN, ShapeGroup, ShapeInstances,
    StateUpdate, UNADDRESSED_BODY,
};
pub use reliability::{ReliableReceiver, ReliableSender, sequence_greater_than};
pub use stats::NetworkStats;
pub use transport::{
    Channel, ConnectionId, LoopbackHandle, LoopbackTransport, Outbound, Transport,
    TransportError, TransportEvent,
};
pub use udp::{
    Frame, MAX_DATAGRAM, RELIABLE_HEADER_LEN, UNRELIABLE_HEADER_LEN, UdpConfig, UdpTransport,
};

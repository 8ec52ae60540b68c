pub mod config;
pub mod level;
pub mod net;
pub mod physics;
pub mod player;
pub mod priority;
pub mod registry;
pub mod replication;
pub mod server;

pub use config::{AgingWeights, CategorySizes, ConfigError, ReplicationConfig};
pub use level::{Level, TestingGround};
pub use net::{
    Channel, ConnectionId, DEFAULT_PORT, DEFAULT_TICK_RATE, LoopbackTransport, MAX_PAYLOAD,
    Message, NetworkStats, ProtocolError, Transport, TransportError, TransportEvent, UdpConfig,
    UdpTransport,
};
pub use physics::{BodyDesc, BodyShape, BodyState, PhysicsWorld, ScriptedSimulation, Simulation};
pub use player::{InputFlags, InputState, PlayerConfig};
pub use priority::{PrioritySet, PrioritySetError};
pub use registry::{BodyId, BodyKey, PlayerId, PlayerKey, Registry, RegistryError};
pub use replication::{ClientReplication, PackPlan, assemble};
pub use server::{ClientSendReport, DisconnectReason, Server, ServerEvent, ServerStats, TickPacer};

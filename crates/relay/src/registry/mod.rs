mod arena;
mod players;

pub use arena::{Arena, Handle};
pub use players::{
    BodyId, BodyKey, MAX_PLAYERS, Player, PlayerId, PlayerKey, Registry, RegistryError, WorldBody,
};

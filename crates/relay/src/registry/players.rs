use glam::Vec3;
use rapier3d::dynamics::RigidBodyHandle;

use crate::physics::{BodyDesc, BodyShape, PlayerBodies, Simulation};
use crate::player::InputState;

use super::arena::{Arena, Handle};

/// Player IDs travel as a non-negative 16-bit signed integer.
pub const MAX_PLAYERS: usize = i16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u16);

impl PlayerId {
    pub fn index(self) -> u32 {
        self.0 as u32
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

impl BodyId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Generation-checked player handle. The bare [`PlayerId`] is what priority
/// sets and the wire use; mutations go through the key so that a stale one
/// cannot reach the next occupant of a recycled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlayerKey {
    id: PlayerId,
    generation: u32,
}

impl PlayerKey {
    pub fn new(id: PlayerId, generation: u32) -> Self {
        Self { id, generation }
    }

    pub fn id(self) -> PlayerId {
        self.id
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    fn handle(self) -> Handle {
        Handle {
            index: self.id.index(),
            generation: self.generation,
        }
    }

    fn from_handle(handle: Handle) -> Self {
        Self {
            id: PlayerId(handle.index as u16),
            generation: handle.generation,
        }
    }
}

/// Generation-checked world body handle, see [`PlayerKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyKey {
    id: BodyId,
    generation: u32,
}

impl BodyKey {
    pub fn new(id: BodyId, generation: u32) -> Self {
        Self { id, generation }
    }

    pub fn id(self) -> BodyId {
        self.id
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    fn handle(self) -> Handle {
        Handle {
            index: self.id.index(),
            generation: self.generation,
        }
    }

    fn from_handle(handle: Handle) -> Self {
        Self {
            id: BodyId(handle.index),
            generation: handle.generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("player capacity of {0} reached")]
    Full(usize),
    #[error("unknown player {0:?}")]
    UnknownPlayer(PlayerId),
    #[error("stale handle for {0:?}")]
    StalePlayer(PlayerKey),
    #[error("unknown world body {0:?}")]
    UnknownBody(BodyId),
    #[error("stale handle for {0:?}")]
    StaleBody(BodyKey),
    #[error("world body capacity reached")]
    BodiesFull,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub bodies: PlayerBodies,
    pub input: InputState,
    pub spawn_position: Vec3,
}

#[derive(Debug, Clone)]
pub struct WorldBody {
    pub handle: RigidBodyHandle,
    pub shape: BodyShape,
    pub is_static: bool,
}

/// Live players and level bodies, keyed by dense recycled IDs so that the
/// per-client priority sets can index straight into arrays.
#[derive(Debug)]
pub struct Registry {
    players: Arena<Player>,
    bodies: Arena<WorldBody>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            players: Arena::with_limit(MAX_PLAYERS),
            bodies: Arena::new(),
        }
    }

    pub fn add_player<S: Simulation>(
        &mut self,
        sim: &mut S,
        position: Vec3,
    ) -> Result<PlayerKey, RegistryError> {
        if self.players.len() >= MAX_PLAYERS {
            return Err(RegistryError::Full(MAX_PLAYERS));
        }

        let bodies = sim.spawn_player(position);
        let player = Player {
            bodies,
            input: InputState::default(),
            spawn_position: position,
        };

        match self.players.insert(player) {
            Some(handle) => Ok(PlayerKey::from_handle(handle)),
            None => {
                sim.remove_body(bodies.avatar);
                sim.remove_body(bodies.attachment);
                Err(RegistryError::Full(MAX_PLAYERS))
            }
        }
    }

    pub fn remove_player<S: Simulation>(
        &mut self,
        sim: &mut S,
        key: PlayerKey,
    ) -> Result<Player, RegistryError> {
        self.check_player(key)?;
        let player = self
            .players
            .remove(key.handle())
            .ok_or(RegistryError::StalePlayer(key))?;
        sim.remove_body(player.bodies.avatar);
        sim.remove_body(player.bodies.attachment);
        Ok(player)
    }

    pub fn exists(&self, id: PlayerId) -> bool {
        self.players.handle_at(id.index()).is_some()
    }

    /// Key of the player currently occupying slot `id`.
    pub fn player_key(&self, id: PlayerId) -> Option<PlayerKey> {
        self.players.handle_at(id.index()).map(PlayerKey::from_handle)
    }

    pub fn is_live(&self, key: PlayerKey) -> bool {
        self.players.contains(key.handle())
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players
            .handle_at(id.index())
            .and_then(|handle| self.players.get(handle))
    }

    pub fn input(&self, id: PlayerId) -> Option<&InputState> {
        self.player(id).map(|player| &player.input)
    }

    pub fn set_input(&mut self, key: PlayerKey, input: InputState) -> Result<(), RegistryError> {
        self.check_player(key)?;
        let player = self
            .players
            .get_mut(key.handle())
            .ok_or(RegistryError::StalePlayer(key))?;
        player.input = input;
        Ok(())
    }

    pub fn player_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players
            .iter()
            .map(|(handle, _)| PlayerId(handle.index as u16))
    }

    pub fn players(&self) -> impl Iterator<Item = (PlayerId, &Player)> {
        self.players
            .iter()
            .map(|(handle, player)| (PlayerId(handle.index as u16), player))
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_capacity(&self) -> usize {
        self.players.capacity()
    }

    pub fn add_world_body<S: Simulation>(
        &mut self,
        sim: &mut S,
        desc: &BodyDesc,
    ) -> Result<BodyKey, RegistryError> {
        let handle = sim.spawn_body(desc);
        let body = WorldBody {
            handle,
            shape: desc.shape,
            is_static: desc.kind.is_static(),
        };
        match self.bodies.insert(body) {
            Some(key) => Ok(BodyKey::from_handle(key)),
            None => {
                sim.remove_body(handle);
                Err(RegistryError::BodiesFull)
            }
        }
    }

    pub fn remove_world_body<S: Simulation>(
        &mut self,
        sim: &mut S,
        key: BodyKey,
    ) -> Result<WorldBody, RegistryError> {
        if self.bodies.handle_at(key.id().index()).is_none() {
            return Err(RegistryError::UnknownBody(key.id()));
        }
        let body = self
            .bodies
            .remove(key.handle())
            .ok_or(RegistryError::StaleBody(key))?;
        sim.remove_body(body.handle);
        Ok(body)
    }

    pub fn body_key(&self, id: BodyId) -> Option<BodyKey> {
        self.bodies.handle_at(id.index()).map(BodyKey::from_handle)
    }

    pub fn world_body(&self, id: BodyId) -> Option<&WorldBody> {
        self.bodies
            .handle_at(id.index())
            .and_then(|key| self.bodies.get(key))
    }

    pub fn world_bodies(&self) -> impl Iterator<Item = (BodyId, &WorldBody)> {
        self.bodies
            .iter()
            .map(|(key, body)| (BodyId(key.index), body))
    }

    /// Bodies that take part in incremental replication.
    pub fn dynamic_body_ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.world_bodies()
            .filter(|(_, body)| !body.is_static)
            .map(|(id, _)| id)
    }

    pub fn world_body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn body_capacity(&self) -> usize {
        self.bodies.capacity()
    }

    fn check_player(&self, key: PlayerKey) -> Result<(), RegistryError> {
        match self.players.handle_at(key.id().index()) {
            None => Err(RegistryError::UnknownPlayer(key.id())),
            Some(current) if current != key.handle() => Err(RegistryError::StalePlayer(key)),
            Some(_) => Ok(()),
        }
    }
}

use crate::config::AgingWeights;
use crate::net::ConnectionId;
use crate::priority::{PrioritySet, PrioritySetError};
use crate::registry::{BodyId, PlayerId, PlayerKey};

use super::Category;

/// Everything the server tracks for one connected client: which peers and
/// bodies it still owes the client, how overdue each one is, and which input
/// sequence it applied last.
#[derive(Debug, Clone)]
pub struct ClientReplication {
    pub conn: ConnectionId,
    pub player: PlayerKey,
    inputs: PrioritySet,
    avatars: PrioritySet,
    bodies: PrioritySet,
    last_input_sequence: Option<u32>,
}

impl ClientReplication {
    pub fn new(conn: ConnectionId, player: PlayerKey) -> Self {
        Self {
            conn,
            player,
            inputs: PrioritySet::new(),
            avatars: PrioritySet::new(),
            bodies: PrioritySet::new(),
            last_input_sequence: None,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player.id()
    }

    pub fn ensure_capacity(&mut self, players: usize, bodies: usize) {
        self.inputs.ensure_capacity(players);
        self.avatars.ensure_capacity(players);
        self.bodies.ensure_capacity(bodies);
    }

    pub fn seed_peer(&mut self, peer: PlayerId) -> Result<(), PrioritySetError> {
        self.inputs.add(peer.index())?;
        self.avatars.add(peer.index())
    }

    pub fn purge_peer(&mut self, peer: PlayerId) -> Result<(), PrioritySetError> {
        let inputs = self.inputs.remove(peer.index());
        let avatars = self.avatars.remove(peer.index());
        inputs.and(avatars)
    }

    pub fn seed_body(&mut self, body: BodyId) -> Result<(), PrioritySetError> {
        self.bodies.add(body.index())
    }

    pub fn purge_body(&mut self, body: BodyId) -> Result<(), PrioritySetError> {
        self.bodies.remove(body.index())
    }

    pub fn has_peer(&self, peer: PlayerId) -> bool {
        self.inputs.contains(peer.index()) && self.avatars.contains(peer.index())
    }

    pub fn has_body(&self, body: BodyId) -> bool {
        self.bodies.contains(body.index())
    }

    /// Records `sequence` as applied if it is newer than the last one.
    /// Returns `false` for stale or duplicate sequences.
    pub fn accept_input_sequence(&mut self, sequence: u32) -> bool {
        match self.last_input_sequence {
            Some(last) if sequence <= last => false,
            _ => {
                self.last_input_sequence = Some(sequence);
                true
            }
        }
    }

    pub fn last_input_sequence(&self) -> Option<u32> {
        self.last_input_sequence
    }

    /// Linear per-tick aging. The sets only ever hold other live players and
    /// dynamic bodies, so aging every member is aging exactly those.
    pub fn age(&mut self, weights: &AgingWeights) {
        self.inputs.age_all(weights.input);
        self.avatars.age_all(weights.avatar);
        self.bodies.age_all(weights.body);
    }

    pub fn sort(&mut self) {
        self.inputs.sort();
        self.avatars.sort();
        self.bodies.sort();
    }

    pub fn set(&self, category: Category) -> &PrioritySet {
        match category {
            Category::Input => &self.inputs,
            Category::Avatar => &self.avatars,
            Category::Body => &self.bodies,
        }
    }

    pub fn set_mut(&mut self, category: Category) -> &mut PrioritySet {
        match category {
            Category::Input => &mut self.inputs,
            Category::Avatar => &mut self.avatars,
            Category::Body => &mut self.bodies,
        }
    }
}

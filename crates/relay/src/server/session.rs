use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;

use crate::config::{CategorySizes, ConfigError, ReplicationConfig};
use crate::level::Level;
use crate::net::{
    AvatarEntry, BodyEntry, Channel, ConnectionId, InputEntry, JoinPlayer, JoinResponse, Message,
    NetworkStats, Pose, ProtocolError, ShapeGroup, ShapeInstances, StateUpdate, Transport,
    TransportEvent,
};
use crate::physics::{BodyState, Simulation};
use crate::priority::PrioritySetError;
use crate::registry::{BodyKey, Player, PlayerId, Registry, RegistryError};
use crate::replication::{ClientReplication, PackPlan, assemble};

use super::events::{DisconnectReason, ServerEvent};

/// What one client was sent on the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSendReport {
    pub conn: ConnectionId,
    pub player: PlayerId,
    pub bytes: usize,
    pub inputs: usize,
    pub avatars: usize,
    pub bodies: usize,
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub frame: u32,
    pub clients: usize,
    pub players: usize,
    pub world_bodies: usize,
    pub dynamic_bodies: usize,
    pub last_tick: Vec<ClientSendReport>,
    pub network: NetworkStats,
}

/// Replication server for one session.
///
/// Owns the registry, the simulation and one [`ClientReplication`] per
/// connection. Each call to [`Server::tick`] drains inbound traffic, steps
/// the simulation once, ages every client's priorities, packs one state
/// update per client and flushes the transport, strictly in that order.
pub struct Server<T: Transport, S: Simulation> {
    transport: T,
    sim: S,
    registry: Registry,
    clients: BTreeMap<ConnectionId, ClientReplication>,
    config: ReplicationConfig,
    sizes: CategorySizes,
    frame: u32,
    events: VecDeque<ServerEvent>,
    last_tick: Vec<ClientSendReport>,
    shut_down: bool,
}

impl<T: Transport, S: Simulation> Server<T, S> {
    pub fn new(transport: T, sim: S, config: ReplicationConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        // Packing with sizes below the encoded ones would overrun max_payload.
        let sizes = config.sizes.at_least(&CategorySizes::encoded());
        if sizes != config.sizes {
            log::warn!(
                "Configured item sizes {:?} are below the encoded sizes, packing with {:?}",
                config.sizes,
                sizes
            );
        }

        Ok(Self {
            transport,
            sim,
            registry: Registry::new(),
            clients: BTreeMap::new(),
            config,
            sizes,
            frame: 0,
            events: VecDeque::new(),
            last_tick: Vec::new(),
            shut_down: false,
        })
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Item sizes the assembler packs with, never below the encoded sizes.
    pub fn packing_sizes(&self) -> CategorySizes {
        self.sizes
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn client(&self, conn: ConnectionId) -> Option<&ClientReplication> {
        self.clients.get(&conn)
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientReplication> {
        self.clients.values()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.events.drain(..)
    }

    /// Registers every body of `level`. Dynamic bodies are seeded into the
    /// body set of each connected client right away.
    pub fn load_level(&mut self, level: &Level) -> Result<Vec<BodyKey>, RegistryError> {
        let mut loaded = Vec::with_capacity(level.bodies().len());
        for desc in level.bodies() {
            let key = self.registry.add_world_body(&mut self.sim, desc)?;
            loaded.push((key, desc.kind.is_static()));
        }

        self.ensure_capacity();
        for &(key, is_static) in &loaded {
            if is_static {
                continue;
            }
            for client in self.clients.values_mut() {
                check_contract(client.seed_body(key.id()), "seeding loaded body");
            }
        }

        log::info!(
            "Loaded level: {} static, {} dynamic bodies",
            level.static_count(),
            level.dynamic_count()
        );
        Ok(loaded.into_iter().map(|(key, _)| key).collect())
    }

    pub fn remove_world_body(&mut self, key: BodyKey) -> Result<(), RegistryError> {
        let body = self.registry.remove_world_body(&mut self.sim, key)?;
        if !body.is_static {
            for client in self.clients.values_mut() {
                check_contract(client.purge_body(key.id()), "purging removed body");
            }
        }
        Ok(())
    }

    pub fn tick(&mut self) {
        if self.shut_down {
            log::debug!("Tick after shutdown ignored");
            return;
        }

        self.drain_inbound();
        self.step_simulation();
        self.frame = self.frame.wrapping_add(1);
        self.age_priorities();
        self.send_state_updates();
        self.flush_transport();
    }

    /// Drops `conn` from the server side and tells its peers.
    pub fn kick(&mut self, conn: ConnectionId) {
        if self.clients.contains_key(&conn) {
            self.transport.disconnect(conn);
            self.handle_disconnect(conn, DisconnectReason::Kicked);
        }
    }

    /// Flushes once more and closes the transport. Further ticks are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.flush_transport();
        self.transport.close();
        self.shut_down = true;
        log::info!("Server shut down at frame {}", self.frame);
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            frame: self.frame,
            clients: self.clients.len(),
            players: self.registry.player_count(),
            world_bodies: self.registry.world_body_count(),
            dynamic_bodies: self.registry.dynamic_body_ids().count(),
            last_tick: self.last_tick.clone(),
            network: self.transport.stats(),
        }
    }

    fn drain_inbound(&mut self) {
        let events = match self.transport.receive() {
            Ok(events) => events,
            Err(e) => {
                log::warn!("Receive failed: {e}");
                self.events.push_back(ServerEvent::Error {
                    message: format!("Receive failed: {e}"),
                });
                return;
            }
        };

        for event in events {
            match event {
                TransportEvent::Connected(conn) => self.handle_connect(conn),
                TransportEvent::Disconnected(conn) => {
                    self.handle_disconnect(conn, DisconnectReason::Graceful)
                }
                TransportEvent::Message(conn, payload) => self.handle_message(conn, &payload),
            }
        }
    }

    fn handle_connect(&mut self, conn: ConnectionId) {
        if self.clients.contains_key(&conn) {
            log::warn!("{conn} connected twice, ignoring");
            return;
        }

        let spawn = self.config.spawn_position;
        let key = match self.registry.add_player(&mut self.sim, spawn) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Rejecting {conn}: {e}");
                self.transport.disconnect(conn);
                self.events.push_back(ServerEvent::ConnectionRejected {
                    conn,
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.ensure_capacity();

        let player = key.id();
        let mut client = ClientReplication::new(conn, key);
        client.ensure_capacity(self.registry.player_capacity(), self.registry.body_capacity());
        for peer in self.registry.player_ids().filter(|&peer| peer != player) {
            check_contract(client.seed_peer(peer), "seeding existing peer");
        }
        for body in self.registry.dynamic_body_ids() {
            check_contract(client.seed_body(body), "seeding existing body");
        }
        for other in self.clients.values_mut() {
            check_contract(other.seed_peer(player), "seeding joined peer");
        }
        self.clients.insert(conn, client);

        let join = self.join_response(player);
        self.send(
            conn,
            Channel::ReliableOrdered,
            Message::JoinResponse(join).encode(),
        );

        let joined = Message::PeerJoined {
            frame: self.frame,
            player,
            position: spawn,
        }
        .encode();
        self.broadcast_reliable(joined, Some(conn));

        log::info!("{conn} joined as {player}");
        self.events
            .push_back(ServerEvent::ClientConnected { conn, player });
    }

    fn handle_disconnect(&mut self, conn: ConnectionId, reason: DisconnectReason) {
        let Some(client) = self.clients.remove(&conn) else {
            log::debug!("Disconnect for unknown {conn}");
            return;
        };
        let player = client.player_id();

        if let Err(e) = self.registry.remove_player(&mut self.sim, client.player) {
            log::error!("Removing {player} for {conn}: {e}");
        }
        for other in self.clients.values_mut() {
            check_contract(other.purge_peer(player), "purging departed peer");
        }

        let left = Message::PeerLeft {
            frame: self.frame,
            player,
        }
        .encode();
        self.broadcast_reliable(left, None);

        log::info!("{conn} ({player}) {}", reason.as_str());
        self.events.push_back(ServerEvent::ClientDisconnected {
            conn,
            player,
            reason,
        });
    }

    fn handle_message(&mut self, conn: ConnectionId, payload: &[u8]) {
        let message = match Message::decode(payload) {
            Ok(message) => message,
            Err(error) => {
                log::warn!("Dropping malformed message from {conn}: {error}");
                self.events
                    .push_back(ServerEvent::ProtocolError { conn, error });
                return;
            }
        };

        let Some(client) = self.clients.get_mut(&conn) else {
            log::warn!("Dropping {:?} from {conn}: no player attached", message.kind());
            return;
        };

        match message {
            Message::ClientInput(input) => {
                if !client.accept_input_sequence(input.sequence) {
                    log::debug!(
                        "Stale input {} from {conn} (last applied {:?})",
                        input.sequence,
                        client.last_input_sequence()
                    );
                    return;
                }
                let player = client.player;
                if let Err(e) = self.registry.set_input(player, input.input) {
                    log::warn!("Dropping input from {conn}: {e}");
                }
            }
            other => {
                let error = ProtocolError::UnexpectedKind(other.kind());
                log::warn!("Dropping message from {conn}: {error}");
                self.events
                    .push_back(ServerEvent::ProtocolError { conn, error });
            }
        }
    }

    fn step_simulation(&mut self) {
        let dt = self.config.dt();
        for (_, player) in self.registry.players() {
            self.sim.drive_player(player.bodies, &player.input, dt);
        }
        self.sim.step(dt);
    }

    fn age_priorities(&mut self) {
        for client in self.clients.values_mut() {
            client.age(&self.config.aging);
        }
    }

    fn send_state_updates(&mut self) {
        let budget = self.config.item_budget();
        let sizes = self.sizes;
        let plans: Vec<(ConnectionId, PlayerId, PackPlan)> = self
            .clients
            .values_mut()
            .map(|client| {
                let plan = assemble(client, &sizes, budget);
                (client.conn, client.player_id(), plan)
            })
            .collect();

        self.last_tick.clear();
        for (conn, player, plan) in plans {
            let update = self.state_update(&plan);
            let report = ClientSendReport {
                conn,
                player,
                bytes: update.encoded_len(),
                inputs: update.inputs.len(),
                avatars: update.avatars.len(),
                bodies: update.bodies.len(),
            };

            let payload = Message::StateUpdate(update).encode();
            if payload.len() > self.config.max_payload {
                let error = format!(
                    "state update for {conn} is {} bytes, over the {} byte budget",
                    payload.len(),
                    self.config.max_payload
                );
                debug_assert!(false, "{error}");
                log::error!("Dropping {error}");
                continue;
            }
            self.send(conn, Channel::Unreliable, payload);
            self.last_tick.push(report);
        }
    }

    fn state_update(&self, plan: &PackPlan) -> StateUpdate {
        let mut update = StateUpdate::new(self.frame);

        for &player in &plan.inputs {
            match self.registry.input(player) {
                Some(input) => update.inputs.push(InputEntry {
                    player,
                    input: *input,
                }),
                None => log::error!("Packed input of unknown {player}"),
            }
        }

        for &player in &plan.avatars {
            match self.registry.player(player).and_then(|p| self.player_states(p)) {
                Some((avatar, attachment)) => update.avatars.push(AvatarEntry {
                    player,
                    avatar,
                    attachment,
                }),
                None => log::error!("Packed avatar of unknown {player}"),
            }
        }

        for &body in &plan.bodies {
            let state = self
                .registry
                .world_body(body)
                .and_then(|b| self.sim.body_state(b.handle));
            match state {
                Some(state) => update.bodies.push(BodyEntry { body, state }),
                None => log::error!("Packed unknown body {body:?}"),
            }
        }

        update
    }

    fn join_response(&self, player: PlayerId) -> JoinResponse {
        let mut groups: Vec<ShapeGroup> = Vec::new();

        for (id, body) in self.registry.world_bodies() {
            let Some(state) = self.sim.body_state(body.handle) else {
                log::error!("World body {id:?} has no simulation state");
                continue;
            };

            let existing = groups.iter().position(|group| {
                group.shape == body.shape
                    && group.is_static() == body.is_static
                    && group.instances.len() < u16::MAX as usize
            });
            let index = match existing {
                Some(index) => index,
                None => {
                    let instances = if body.is_static {
                        ShapeInstances::Static(Vec::new())
                    } else {
                        ShapeInstances::Dynamic(Vec::new())
                    };
                    groups.push(ShapeGroup {
                        shape: body.shape,
                        instances,
                    });
                    groups.len() - 1
                }
            };

            match &mut groups[index].instances {
                ShapeInstances::Static(poses) => poses.push(Pose::from(&state)),
                ShapeInstances::Dynamic(bodies) => bodies.push(BodyEntry { body: id, state }),
            }
        }

        let players = self
            .registry
            .players()
            .filter_map(|(id, p)| {
                let (avatar, attachment) = self.player_states(p)?;
                Some(JoinPlayer {
                    player: id,
                    avatar,
                    attachment,
                    input: p.input,
                })
            })
            .collect();

        JoinResponse {
            player,
            frame: self.frame,
            groups,
            players,
        }
    }

    fn player_states(&self, player: &Player) -> Option<(BodyState, BodyState)> {
        let avatar = self.sim.body_state(player.bodies.avatar)?;
        let attachment = self.sim.body_state(player.bodies.attachment)?;
        Some((avatar, attachment))
    }

    fn ensure_capacity(&mut self) {
        let players = self.registry.player_capacity();
        let bodies = self.registry.body_capacity();
        for client in self.clients.values_mut() {
            client.ensure_capacity(players, bodies);
        }
    }

    fn send(&mut self, conn: ConnectionId, channel: Channel, payload: Bytes) {
        if let Err(e) = self.transport.send(conn, channel, payload) {
            log::warn!("Send to {conn} failed: {e}");
        }
    }

    fn broadcast_reliable(&mut self, payload: Bytes, except: Option<ConnectionId>) {
        let targets: Vec<ConnectionId> = self
            .clients
            .keys()
            .copied()
            .filter(|&conn| Some(conn) != except)
            .collect();
        for conn in targets {
            self.send(conn, Channel::ReliableOrdered, payload.clone());
        }
    }

    fn flush_transport(&mut self) {
        if let Err(e) = self.transport.flush() {
            log::warn!("Flush failed: {e}");
            self.events.push_back(ServerEvent::Error {
                message: format!("Flush failed: {e}"),
            });
        }
    }
}

fn check_contract(result: Result<(), PrioritySetError>, context: &str) {
    if let Err(e) = result {
        debug_assert!(false, "{context}: {e}");
        log::error!("{context}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{LoopbackHandle, LoopbackTransport, Outbound};
    use crate::physics::{BodyDesc, BodyShape, ScriptedSimulation};
    use glam::Vec3;

    fn server() -> (Server<LoopbackTransport, ScriptedSimulation>, LoopbackHandle) {
        let (transport, handle) = LoopbackTransport::pair();
        let server = Server::new(
            transport,
            ScriptedSimulation::new(),
            ReplicationConfig::default(),
        )
        .unwrap();
        (server, handle)
    }

    #[test]
    fn invalid_config_is_refused() {
        let (transport, _handle) = LoopbackTransport::pair();
        let config = ReplicationConfig {
            tick_rate: 0,
            ..ReplicationConfig::default()
        };
        assert!(matches!(
            Server::new(transport, ScriptedSimulation::new(), config),
            Err(ConfigError::ZeroTickRate)
        ));
    }

    #[test]
    fn tick_steps_simulation_once() {
        let (mut server, _handle) = server();
        server.tick();
        server.tick();
        assert_eq!(server.simulation().steps(), 2);
        assert_eq!(server.frame(), 2);
    }

    #[test]
    fn bodies_loaded_mid_session_are_seeded() {
        let (mut server, handle) = server();
        handle.connect(ConnectionId(1));
        server.tick();

        let mut level = Level::new();
        level.push(BodyDesc::dynamic(
            BodyShape::Sphere { radius: 0.5 },
            Vec3::Y,
            1.0,
        ));
        level.push(BodyDesc::fixed(
            BodyShape::Box {
                half_extents: Vec3::ONE,
            },
            Vec3::ZERO,
        ));
        let keys = server.load_level(&level).unwrap();

        let client = server.client(ConnectionId(1)).unwrap();
        assert!(client.has_body(keys[0].id()));
        assert!(!client.has_body(keys[1].id()));

        server.remove_world_body(keys[0]).unwrap();
        assert!(!server.client(ConnectionId(1)).unwrap().has_body(keys[0].id()));
        assert!(server.remove_world_body(keys[0]).is_err());
    }

    #[test]
    fn packing_never_uses_sizes_below_the_encoding() {
        let (transport, _handle) = LoopbackTransport::pair();
        let config = ReplicationConfig {
            sizes: CategorySizes {
                input: 17,
                avatar: 45,
                body: 40,
            },
            ..ReplicationConfig::default()
        };
        let server = Server::new(transport, ScriptedSimulation::new(), config).unwrap();
        assert_eq!(
            server.packing_sizes(),
            CategorySizes {
                input: 17,
                avatar: crate::net::AVATAR_ITEM_LEN,
                body: crate::net::BODY_ITEM_LEN,
            }
        );
    }

    #[test]
    fn disconnect_frees_the_players_key() {
        let (mut server, handle) = server();
        handle.connect(ConnectionId(1));
        server.tick();
        let key = server.client(ConnectionId(1)).unwrap().player;

        handle.disconnect(ConnectionId(1));
        handle.connect(ConnectionId(2));
        server.tick();

        let reused = server.client(ConnectionId(2)).unwrap().player;
        assert_eq!(reused.id(), key.id());
        assert!(!server.registry().is_live(key));
        assert!(server.registry().is_live(reused));
    }

    #[test]
    fn shutdown_closes_transport_once() {
        let (mut server, handle) = server();
        server.shutdown();
        server.shutdown();
        server.tick();

        assert!(server.is_shut_down());
        assert_eq!(server.frame(), 0);
        assert_eq!(handle.drain(), vec![Outbound::Closed]);
    }
}

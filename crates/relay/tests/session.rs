use std::collections::HashSet;

use glam::Vec3;
use relay::net::{ClientInput, LoopbackHandle, Outbound};
use relay::{
    BodyDesc, BodyShape, CategorySizes, Channel, ConnectionId, DisconnectReason, InputFlags,
    InputState, Level, LoopbackTransport, Message, PlayerId, ReplicationConfig, ScriptedSimulation,
    Server, ServerEvent,
};

type TestServer = Server<LoopbackTransport, ScriptedSimulation>;

fn server() -> (TestServer, LoopbackHandle) {
    let (transport, handle) = LoopbackTransport::pair();
    let server = Server::new(
        transport,
        ScriptedSimulation::new(),
        ReplicationConfig::default(),
    )
    .unwrap();
    (server, handle)
}

fn props(count: usize) -> Level {
    (0..count)
        .map(|i| {
            BodyDesc::dynamic(
                BodyShape::Sphere { radius: 0.3 },
                Vec3::new(i as f32, 1.0, 0.0),
                1.0,
            )
        })
        .collect()
}

/// Decoded messages sent to `conn` on `channel`, in send order.
fn messages_for(outbound: &[Outbound], conn: ConnectionId, channel: Channel) -> Vec<Message> {
    outbound
        .iter()
        .filter_map(|out| match out {
            Outbound::Delivery {
                conn: to,
                channel: ch,
                payload,
            } if *to == conn && *ch == channel => Some(Message::decode(payload).unwrap()),
            _ => None,
        })
        .collect()
}

fn connect_all(server: &mut TestServer, handle: &LoopbackHandle, count: u32) {
    for i in 1..=count {
        handle.connect(ConnectionId(i));
    }
    server.tick();
    server.drain_events().for_each(drop);
}

#[test]
fn late_joiner_sees_every_player_and_is_seeded_everywhere() {
    let (mut server, handle) = server();
    server.load_level(&props(5)).unwrap();
    connect_all(&mut server, &handle, 10);
    handle.drain();

    handle.connect(ConnectionId(11));
    server.tick();

    let events: Vec<ServerEvent> = server.drain_events().collect();
    let player = match events.as_slice() {
        [ServerEvent::ClientConnected { conn, player }] => {
            assert_eq!(*conn, ConnectionId(11));
            *player
        }
        other => panic!("unexpected events {other:?}"),
    };

    let outbound = handle.drain();
    let reliable = messages_for(&outbound, ConnectionId(11), Channel::ReliableOrdered);
    let Some(Message::JoinResponse(join)) = reliable.first() else {
        panic!("expected a join response, got {reliable:?}");
    };
    assert_eq!(join.player, player);
    assert_eq!(join.players.len(), 11);
    assert!(join.players.iter().any(|p| p.player == player));
    let dynamic: usize = join
        .groups
        .iter()
        .filter(|g| !g.is_static())
        .map(|g| g.instances.len())
        .sum();
    assert_eq!(dynamic, 5);

    for i in 1..=10 {
        let conn = ConnectionId(i);
        assert!(server.client(conn).unwrap().has_peer(player));

        let announced = messages_for(&outbound, conn, Channel::ReliableOrdered)
            .into_iter()
            .any(|m| matches!(m, Message::PeerJoined { player: p, .. } if p == player));
        assert!(announced, "{conn} was not told about {player}");
    }

    let newcomer = server.client(ConnectionId(11)).unwrap();
    for (id, _) in server.registry().players() {
        assert_eq!(newcomer.has_peer(id), id != player);
    }
    for body in server.registry().dynamic_body_ids() {
        assert!(newcomer.has_body(body));
    }
}

#[test]
fn disconnect_purges_peer_everywhere() {
    let (mut server, handle) = server();
    connect_all(&mut server, &handle, 3);
    let leaving = server.client(ConnectionId(2)).unwrap().player_id();
    handle.drain();

    handle.disconnect(ConnectionId(2));
    server.tick();

    let events: Vec<ServerEvent> = server.drain_events().collect();
    assert!(matches!(
        events.as_slice(),
        [ServerEvent::ClientDisconnected {
            conn: ConnectionId(2),
            reason: DisconnectReason::Graceful,
            ..
        }]
    ));
    assert!(!server.registry().exists(leaving));
    assert!(server.client(ConnectionId(2)).is_none());

    let outbound = handle.drain();
    for conn in [ConnectionId(1), ConnectionId(3)] {
        assert!(!server.client(conn).unwrap().has_peer(leaving));
        let reliable = messages_for(&outbound, conn, Channel::ReliableOrdered);
        assert!(
            reliable
                .iter()
                .any(|m| matches!(m, Message::PeerLeft { player, .. } if *player == leaving))
        );
    }
}

#[test]
fn kicked_client_is_removed() {
    let (mut server, handle) = server();
    connect_all(&mut server, &handle, 2);
    handle.drain();

    server.kick(ConnectionId(1));
    server.kick(ConnectionId(1));

    assert!(server.client(ConnectionId(1)).is_none());
    assert_eq!(server.registry().player_count(), 1);
    let kicked = handle
        .drain()
        .into_iter()
        .filter(|out| *out == Outbound::Kicked(ConnectionId(1)))
        .count();
    assert_eq!(kicked, 1);
}

#[test]
fn stale_input_is_ignored() {
    let (mut server, handle) = server();
    connect_all(&mut server, &handle, 1);
    let player = server.client(ConnectionId(1)).unwrap().player_id();

    let newer = InputState::new(InputFlags::FORWARD, Vec3::NEG_Z);
    let older = InputState::new(InputFlags::BACK | InputFlags::JUMP, Vec3::X);
    for (sequence, input) in [(5, newer), (3, older), (5, older)] {
        let message = Message::ClientInput(ClientInput { sequence, input });
        handle.send(ConnectionId(1), message.encode());
    }
    server.tick();

    assert_eq!(server.registry().input(player), Some(&newer));
    assert_eq!(
        server.client(ConnectionId(1)).unwrap().last_input_sequence(),
        Some(5)
    );
}

#[test]
fn malformed_and_unexpected_messages_raise_protocol_errors() {
    let (mut server, handle) = server();
    connect_all(&mut server, &handle, 1);

    handle.send(ConnectionId(1), bytes::Bytes::from_static(&[0xEE]));
    let left = Message::PeerLeft {
        frame: 0,
        player: PlayerId(0),
    };
    handle.send(ConnectionId(1), left.encode());
    server.tick();

    let errors = server
        .drain_events()
        .filter(|e| matches!(e, ServerEvent::ProtocolError { .. }))
        .count();
    assert_eq!(errors, 2);
    assert_eq!(server.registry().player_count(), 1);
}

#[test]
fn every_body_is_replicated_within_a_few_ticks() {
    let (mut server, handle) = server();
    let ids = server.load_level(&props(100)).unwrap();
    connect_all(&mut server, &handle, 1);
    handle.drain();

    let mut seen = HashSet::new();
    for _ in 0..8 {
        server.tick();
        for message in messages_for(&handle.drain(), ConnectionId(1), Channel::Unreliable) {
            let Message::StateUpdate(update) = message else {
                panic!("unexpected unreliable message");
            };
            assert!(update.encoded_len() <= server.config().max_payload);
            seen.extend(update.bodies.iter().map(|b| b.body));
        }
    }

    assert_eq!(seen.len(), ids.len());
}

#[test]
fn state_updates_carry_peers_but_not_self() {
    let (mut server, handle) = server();
    connect_all(&mut server, &handle, 3);
    let me = server.client(ConnectionId(1)).unwrap().player_id();
    handle.drain();

    server.tick();
    let updates = messages_for(&handle.drain(), ConnectionId(1), Channel::Unreliable);
    let [Message::StateUpdate(update)] = updates.as_slice() else {
        panic!("expected one state update, got {updates:?}");
    };

    assert_eq!(update.frame, server.frame());
    assert_eq!(update.inputs.len(), 2);
    assert_eq!(update.avatars.len(), 2);
    assert!(update.inputs.iter().all(|e| e.player != me));
    assert!(update.avatars.iter().all(|e| e.player != me));

    let report = server
        .stats()
        .last_tick
        .into_iter()
        .find(|r| r.conn == ConnectionId(1))
        .unwrap();
    assert_eq!(report.bytes, update.encoded_len());
}

#[test]
fn small_configured_sizes_never_overrun_the_payload() {
    let (transport, handle) = LoopbackTransport::pair();
    let config = ReplicationConfig {
        sizes: CategorySizes {
            input: 17,
            avatar: 45,
            body: 40,
        },
        ..ReplicationConfig::default()
    };
    let max_payload = config.max_payload;
    let mut server = Server::new(transport, ScriptedSimulation::new(), config).unwrap();
    server.load_level(&props(50)).unwrap();
    connect_all(&mut server, &handle, 3);
    handle.drain();

    for _ in 0..4 {
        server.tick();
        let outbound = handle.drain();
        for i in 1..=3 {
            let conn = ConnectionId(i);
            let updates: Vec<usize> = outbound
                .iter()
                .filter_map(|out| match out {
                    Outbound::Delivery {
                        conn: to,
                        channel: Channel::Unreliable,
                        payload,
                    } if *to == conn => Some(payload.len()),
                    _ => None,
                })
                .collect();
            assert_eq!(updates.len(), 1, "{conn} missed its state update");
            assert!(updates[0] <= max_payload, "{conn} sent {} bytes", updates[0]);
        }
    }

    for report in server.stats().last_tick {
        assert!(report.bytes <= max_payload);
        assert!(report.bodies > 0);
    }
}

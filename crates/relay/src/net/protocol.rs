use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::{Quat, Vec3};

use crate::physics::{BodyShape, BodyState, ShapeKind};
use crate::player::InputState;
use crate::registry::{BodyId, PlayerId};

use super::codec::{
    FULL_BODY_STATE_LEN, INPUT_STATE_LEN, PLAYER_ID_LEN, ensure, get_body_state, get_count,
    get_input, get_pose, get_vec3, put_body_state, put_count, put_input, put_pose, put_vec3,
};

pub const MAX_PAYLOAD: usize = 1200;
pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Handle written in place of a body handle for states addressed by player.
pub const UNADDRESSED_BODY: u32 = u32::MAX;

pub const INPUT_ITEM_LEN: usize = PLAYER_ID_LEN + INPUT_STATE_LEN;
pub const AVATAR_ITEM_LEN: usize = PLAYER_ID_LEN + 2 * FULL_BODY_STATE_LEN;
pub const BODY_ITEM_LEN: usize = FULL_BODY_STATE_LEN;
/// Kind tag, frame number and the three list counts.
pub const STATE_UPDATE_HEADER_LEN: usize = 1 + 4 + 3 * 2;

const SHAPE_STATIC: u8 = 1 << 4;
const SHAPE_MULTI: u8 = 1 << 5;
const SHAPE_KIND_MASK: u8 = 0x0f;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("unexpected {0:?} message")]
    UnexpectedKind(MessageKind),
    #[error("message truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("invalid player id {0}")]
    InvalidPlayerId(i16),
    #[error("unknown shape type {0}")]
    UnknownShape(u8),
    #[error("empty message")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    JoinResponse = 1,
    PeerJoined = 2,
    PeerLeft = 3,
    StateUpdate = 4,
    ClientInput = 5,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::JoinResponse),
            2 => Ok(Self::PeerJoined),
            3 => Ok(Self::PeerLeft),
            4 => Ok(Self::StateUpdate),
            5 => Ok(Self::ClientInput),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl From<&BodyState> for Pose {
    fn from(state: &BodyState) -> Self {
        Self {
            position: state.position,
            rotation: state.rotation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEntry {
    pub player: PlayerId,
    pub input: InputState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarEntry {
    pub player: PlayerId,
    pub avatar: BodyState,
    pub attachment: BodyState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyEntry {
    pub body: BodyId,
    pub state: BodyState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeInstances {
    Static(Vec<Pose>),
    Dynamic(Vec<BodyEntry>),
}

impl ShapeInstances {
    pub fn len(&self) -> usize {
        match self {
            Self::Static(poses) => poses.len(),
            Self::Dynamic(bodies) => bodies.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All world bodies sharing one shape and one static/dynamic mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeGroup {
    pub shape: BodyShape,
    pub instances: ShapeInstances,
}

impl ShapeGroup {
    pub fn is_static(&self) -> bool {
        matches!(self.instances, ShapeInstances::Static(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinPlayer {
    pub player: PlayerId,
    pub avatar: BodyState,
    pub attachment: BodyState,
    pub input: InputState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponse {
    pub player: PlayerId,
    pub frame: u32,
    pub groups: Vec<ShapeGroup>,
    pub players: Vec<JoinPlayer>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateUpdate {
    pub frame: u32,
    pub inputs: Vec<InputEntry>,
    pub avatars: Vec<AvatarEntry>,
    pub bodies: Vec<BodyEntry>,
}

impl StateUpdate {
    pub fn new(frame: u32) -> Self {
        Self {
            frame,
            ..Self::default()
        }
    }

    pub fn encoded_len(&self) -> usize {
        STATE_UPDATE_HEADER_LEN
            + self.inputs.len() * INPUT_ITEM_LEN
            + self.avatars.len() * AVATAR_ITEM_LEN
            + self.bodies.len() * BODY_ITEM_LEN
    }

    pub fn item_count(&self) -> usize {
        self.inputs.len() + self.avatars.len() + self.bodies.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientInput {
    pub sequence: u32,
    pub input: InputState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    JoinResponse(JoinResponse),
    PeerJoined {
        frame: u32,
        player: PlayerId,
        position: Vec3,
    },
    PeerLeft {
        frame: u32,
        player: PlayerId,
    },
    StateUpdate(StateUpdate),
    ClientInput(ClientInput),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::JoinResponse(_) => MessageKind::JoinResponse,
            Self::PeerJoined { .. } => MessageKind::PeerJoined,
            Self::PeerLeft { .. } => MessageKind::PeerLeft,
            Self::StateUpdate(_) => MessageKind::StateUpdate,
            Self::ClientInput(_) => MessageKind::ClientInput,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size_hint());
        buf.put_u8(self.kind() as u8);

        match self {
            Self::JoinResponse(join) => encode_join(&mut buf, join),
            Self::PeerJoined {
                frame,
                player,
                position,
            } => {
                buf.put_u32_le(*frame);
                put_player(&mut buf, *player);
                put_vec3(&mut buf, *position);
            }
            Self::PeerLeft { frame, player } => {
                buf.put_u32_le(*frame);
                put_player(&mut buf, *player);
            }
            Self::StateUpdate(update) => encode_update(&mut buf, update),
            Self::ClientInput(input) => {
                buf.put_u32_le(input.sequence);
                put_input(&mut buf, &input.input);
            }
        }

        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = data;
        if !buf.has_remaining() {
            return Err(ProtocolError::Empty);
        }

        let message = match MessageKind::try_from(buf.get_u8())? {
            MessageKind::JoinResponse => Self::JoinResponse(decode_join(&mut buf)?),
            MessageKind::PeerJoined => {
                ensure(&buf, 4)?;
                let frame = buf.get_u32_le();
                let player = get_player(&mut buf)?;
                let position = get_vec3(&mut buf)?;
                Self::PeerJoined {
                    frame,
                    player,
                    position,
                }
            }
            MessageKind::PeerLeft => {
                ensure(&buf, 4)?;
                let frame = buf.get_u32_le();
                let player = get_player(&mut buf)?;
                Self::PeerLeft { frame, player }
            }
            MessageKind::StateUpdate => Self::StateUpdate(decode_update(&mut buf)?),
            MessageKind::ClientInput => {
                ensure(&buf, 4)?;
                let sequence = buf.get_u32_le();
                let input = get_input(&mut buf)?;
                Self::ClientInput(ClientInput { sequence, input })
            }
        };

        if buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes(buf.remaining()));
        }
        Ok(message)
    }

    fn size_hint(&self) -> usize {
        match self {
            Self::StateUpdate(update) => update.encoded_len(),
            Self::JoinResponse(join) => {
                let bodies: usize = join.groups.iter().map(|g| g.instances.len()).sum();
                64 + bodies * FULL_BODY_STATE_LEN
                    + join.players.len() * (PLAYER_ID_LEN + 2 * FULL_BODY_STATE_LEN + INPUT_STATE_LEN)
            }
            _ => 32,
        }
    }
}

fn put_player(buf: &mut impl BufMut, player: PlayerId) {
    buf.put_i16_le(player.0 as i16);
}

fn get_player(buf: &mut impl Buf) -> Result<PlayerId, ProtocolError> {
    ensure(buf, PLAYER_ID_LEN)?;
    let raw = buf.get_i16_le();
    if raw < 0 {
        return Err(ProtocolError::InvalidPlayerId(raw));
    }
    Ok(PlayerId(raw as u16))
}

fn encode_update(buf: &mut BytesMut, update: &StateUpdate) {
    buf.put_u32_le(update.frame);

    put_count(buf, update.inputs.len());
    for entry in &update.inputs {
        put_player(buf, entry.player);
        put_input(buf, &entry.input);
    }

    put_count(buf, update.avatars.len());
    for entry in &update.avatars {
        put_player(buf, entry.player);
        put_body_state(buf, UNADDRESSED_BODY, &entry.avatar);
        put_body_state(buf, UNADDRESSED_BODY, &entry.attachment);
    }

    put_count(buf, update.bodies.len());
    for entry in &update.bodies {
        put_body_state(buf, entry.body.index(), &entry.state);
    }
}

fn decode_update(buf: &mut &[u8]) -> Result<StateUpdate, ProtocolError> {
    ensure(buf, 4)?;
    let mut update = StateUpdate::new(buf.get_u32_le());

    let count = get_count(buf)?;
    ensure(buf, count * INPUT_ITEM_LEN)?;
    for _ in 0..count {
        let player = get_player(buf)?;
        let input = get_input(buf)?;
        update.inputs.push(InputEntry { player, input });
    }

    let count = get_count(buf)?;
    ensure(buf, count * AVATAR_ITEM_LEN)?;
    for _ in 0..count {
        let player = get_player(buf)?;
        let (_, avatar) = get_body_state(buf)?;
        let (_, attachment) = get_body_state(buf)?;
        update.avatars.push(AvatarEntry {
            player,
            avatar,
            attachment,
        });
    }

    let count = get_count(buf)?;
    ensure(buf, count * BODY_ITEM_LEN)?;
    for _ in 0..count {
        let (handle, state) = get_body_state(buf)?;
        update.bodies.push(BodyEntry {
            body: BodyId(handle),
            state,
        });
    }

    Ok(update)
}

fn put_shape(buf: &mut impl BufMut, shape: &BodyShape) {
    match *shape {
        BodyShape::Box { half_extents } => put_vec3(buf, half_extents),
        BodyShape::Capsule {
            half_height,
            radius,
        }
        | BodyShape::Cylinder {
            half_height,
            radius,
        } => {
            buf.put_f32_le(half_height);
            buf.put_f32_le(radius);
        }
        BodyShape::Sphere { radius } => buf.put_f32_le(radius),
    }
}

fn get_shape(buf: &mut impl Buf, kind: ShapeKind) -> Result<BodyShape, ProtocolError> {
    let shape = match kind {
        ShapeKind::Box => BodyShape::Box {
            half_extents: get_vec3(buf)?,
        },
        ShapeKind::Capsule | ShapeKind::Cylinder => {
            ensure(buf, 8)?;
            let half_height = buf.get_f32_le();
            let radius = buf.get_f32_le();
            if kind == ShapeKind::Capsule {
                BodyShape::Capsule {
                    half_height,
                    radius,
                }
            } else {
                BodyShape::Cylinder {
                    half_height,
                    radius,
                }
            }
        }
        ShapeKind::Sphere => {
            ensure(buf, 4)?;
            BodyShape::Sphere {
                radius: buf.get_f32_le(),
            }
        }
    };
    Ok(shape)
}

fn encode_join(buf: &mut BytesMut, join: &JoinResponse) {
    put_player(buf, join.player);
    buf.put_u32_le(join.frame);

    put_count(buf, join.groups.len());
    for group in &join.groups {
        let mut type_byte = group.shape.kind() as u8;
        if group.is_static() {
            type_byte |= SHAPE_STATIC;
        }
        let multi = group.instances.len() > 1;
        if multi {
            type_byte |= SHAPE_MULTI;
        }

        buf.put_u8(type_byte);
        put_shape(buf, &group.shape);
        if multi {
            put_count(buf, group.instances.len());
        }

        match &group.instances {
            ShapeInstances::Static(poses) => {
                for pose in poses {
                    put_pose(buf, pose);
                }
            }
            ShapeInstances::Dynamic(bodies) => {
                for entry in bodies {
                    put_body_state(buf, entry.body.index(), &entry.state);
                }
            }
        }
    }

    put_count(buf, join.players.len());
    for player in &join.players {
        put_player(buf, player.player);
        put_body_state(buf, UNADDRESSED_BODY, &player.avatar);
        put_body_state(buf, UNADDRESSED_BODY, &player.attachment);
        put_input(buf, &player.input);
    }
}

fn decode_join(buf: &mut &[u8]) -> Result<JoinResponse, ProtocolError> {
    let player = get_player(buf)?;
    ensure(buf, 4)?;
    let frame = buf.get_u32_le();

    let group_count = get_count(buf)?;
    let mut groups = Vec::with_capacity(group_count.min(256));
    for _ in 0..group_count {
        ensure(buf, 1)?;
        let type_byte = buf.get_u8();
        let kind = ShapeKind::try_from(type_byte & SHAPE_KIND_MASK)
            .map_err(ProtocolError::UnknownShape)?;
        let shape = get_shape(buf, kind)?;
        let count = if type_byte & SHAPE_MULTI != 0 {
            get_count(buf)?
        } else {
            1
        };

        let instances = if type_byte & SHAPE_STATIC != 0 {
            let mut poses = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                poses.push(get_pose(buf)?);
            }
            ShapeInstances::Static(poses)
        } else {
            let mut bodies = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let (handle, state) = get_body_state(buf)?;
                bodies.push(BodyEntry {
                    body: BodyId(handle),
                    state,
                });
            }
            ShapeInstances::Dynamic(bodies)
        };
        groups.push(ShapeGroup { shape, instances });
    }

    let player_count = get_count(buf)?;
    let mut players = Vec::with_capacity(player_count.min(256));
    for _ in 0..player_count {
        let id = get_player(buf)?;
        let (_, avatar) = get_body_state(buf)?;
        let (_, attachment) = get_body_state(buf)?;
        let input = get_input(buf)?;
        players.push(JoinPlayer {
            player: id,
            avatar,
            attachment,
            input,
        });
    }

    Ok(JoinResponse {
        player,
        frame,
        groups,
        players,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::InputFlags;

    fn sample_update() -> StateUpdate {
        let mut update = StateUpdate::new(42);
        update.inputs.push(InputEntry {
            player: PlayerId(3),
            input: InputState::new(InputFlags::SPRINT, Vec3::Z),
        });
        update.avatars.push(AvatarEntry {
            player: PlayerId(3),
            avatar: BodyState::at(Vec3::new(1.0, 2.0, 3.0)),
            attachment: BodyState::at(Vec3::new(1.0, 3.0, 3.0)),
        });
        update.bodies.push(BodyEntry {
            body: BodyId(17),
            state: BodyState::at(Vec3::Y),
        });
        update
    }

    #[test]
    fn item_sizes() {
        assert_eq!(INPUT_ITEM_LEN, 15);
        assert_eq!(AVATAR_ITEM_LEN, 114);
        assert_eq!(BODY_ITEM_LEN, 56);
        assert_eq!(STATE_UPDATE_HEADER_LEN, 11);
    }

    #[test]
    fn state_update_layout() {
        let update = sample_update();
        let bytes = Message::StateUpdate(update.clone()).encode();

        assert_eq!(bytes.len(), update.encoded_len());
        assert_eq!(bytes[0], MessageKind::StateUpdate as u8);
        assert_eq!(&bytes[1..5], &42u32.to_le_bytes());
        assert_eq!(&bytes[5..7], &1u16.to_le_bytes());
        assert_eq!(&bytes[7..9], &3i16.to_le_bytes());

        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, Message::StateUpdate(update));
    }

    #[test]
    fn empty_update_is_header_only() {
        let bytes = Message::StateUpdate(StateUpdate::new(1)).encode();
        assert_eq!(bytes.len(), STATE_UPDATE_HEADER_LEN);
    }

    #[test]
    fn join_response_groups_carry_flags() {
        let join = JoinResponse {
            player: PlayerId(2),
            frame: 9,
            groups: vec![
                ShapeGroup {
                    shape: BodyShape::Box {
                        half_extents: Vec3::ONE,
                    },
                    instances: ShapeInstances::Static(vec![
                        Pose::from(&BodyState::at(Vec3::ZERO)),
                        Pose::from(&BodyState::at(Vec3::X)),
                    ]),
                },
                ShapeGroup {
                    shape: BodyShape::Sphere { radius: 0.5 },
                    instances: ShapeInstances::Dynamic(vec![BodyEntry {
                        body: BodyId(4),
                        state: BodyState::at(Vec3::Y),
                    }]),
                },
            ],
            players: vec![JoinPlayer {
                player: PlayerId(2),
                avatar: BodyState::default(),
                attachment: BodyState::default(),
                input: InputState::default(),
            }],
        };

        let bytes = Message::JoinResponse(join.clone()).encode();
        // kind, player, frame, group count
        let first_group = 1 + 2 + 4 + 2;
        assert_eq!(
            bytes[first_group],
            ShapeKind::Box as u8 | SHAPE_STATIC | SHAPE_MULTI
        );

        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, Message::JoinResponse(join));
    }

    #[test]
    fn peer_join_layout() {
        let message = Message::PeerJoined {
            frame: 7,
            player: PlayerId(5),
            position: Vec3::new(0.0, 1.0, 0.0),
        };
        let bytes = message.encode();
        assert_eq!(bytes.len(), 1 + 4 + 2 + 12);
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert_eq!(
            Message::decode(&[0xee, 0, 0]).unwrap_err(),
            ProtocolError::UnknownKind(0xee)
        );
        assert_eq!(Message::decode(&[]).unwrap_err(), ProtocolError::Empty);
    }

    #[test]
    fn truncated_and_trailing_are_rejected() {
        let bytes = Message::ClientInput(ClientInput {
            sequence: 3,
            input: InputState::default(),
        })
        .encode();

        assert!(matches!(
            Message::decode(&bytes[..bytes.len() - 1]),
            Err(ProtocolError::Truncated { .. })
        ));

        let mut padded = bytes.to_vec();
        padded.push(0);
        assert_eq!(
            Message::decode(&padded).unwrap_err(),
            ProtocolError::TrailingBytes(1)
        );
    }

    #[test]
    fn negative_player_id_is_rejected() {
        let mut bytes = vec![MessageKind::PeerLeft as u8];
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(-4i16).to_le_bytes());
        assert_eq!(
            Message::decode(&bytes).unwrap_err(),
            ProtocolError::InvalidPlayerId(-4)
        );
    }
}

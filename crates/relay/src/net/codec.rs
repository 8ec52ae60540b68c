use bytes::{Buf, BufMut};
use glam::{Quat, Vec3};

use crate::physics::BodyState;
use crate::player::{InputFlags, InputState};

use super::protocol::{Pose, ProtocolError};

pub const VEC3_LEN: usize = 12;
pub const QUAT_LEN: usize = 16;
pub const POSE_LEN: usize = VEC3_LEN + QUAT_LEN;
pub const INPUT_STATE_LEN: usize = 1 + VEC3_LEN;
pub const FULL_BODY_STATE_LEN: usize = 4 + POSE_LEN + VEC3_LEN + VEC3_LEN;
pub const PLAYER_ID_LEN: usize = 2;

pub(crate) fn ensure(buf: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

pub(crate) fn put_vec3(buf: &mut impl BufMut, v: Vec3) {
    buf.put_f32_le(v.x);
    buf.put_f32_le(v.y);
    buf.put_f32_le(v.z);
}

pub(crate) fn get_vec3(buf: &mut impl Buf) -> Result<Vec3, ProtocolError> {
    ensure(buf, VEC3_LEN)?;
    Ok(Vec3::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()))
}

pub(crate) fn put_quat(buf: &mut impl BufMut, q: Quat) {
    buf.put_f32_le(q.x);
    buf.put_f32_le(q.y);
    buf.put_f32_le(q.z);
    buf.put_f32_le(q.w);
}

pub(crate) fn get_quat(buf: &mut impl Buf) -> Result<Quat, ProtocolError> {
    ensure(buf, QUAT_LEN)?;
    Ok(Quat::from_xyzw(
        buf.get_f32_le(),
        buf.get_f32_le(),
        buf.get_f32_le(),
        buf.get_f32_le(),
    ))
}

pub(crate) fn put_pose(buf: &mut impl BufMut, pose: &Pose) {
    put_vec3(buf, pose.position);
    put_quat(buf, pose.rotation);
}

pub(crate) fn get_pose(buf: &mut impl Buf) -> Result<Pose, ProtocolError> {
    Ok(Pose {
        position: get_vec3(buf)?,
        rotation: get_quat(buf)?,
    })
}

pub(crate) fn put_input(buf: &mut impl BufMut, input: &InputState) {
    buf.put_u8(input.flags.bits());
    put_vec3(buf, input.view);
}

pub(crate) fn get_input(buf: &mut impl Buf) -> Result<InputState, ProtocolError> {
    ensure(buf, INPUT_STATE_LEN)?;
    let flags = InputFlags::from_bits_truncate(buf.get_u8());
    Ok(InputState {
        flags,
        view: get_vec3(buf)?,
    })
}

pub(crate) fn put_body_state(buf: &mut impl BufMut, handle: u32, state: &BodyState) {
    buf.put_u32_le(handle);
    put_vec3(buf, state.position);
    put_quat(buf, state.rotation);
    put_vec3(buf, state.linear_velocity);
    put_vec3(buf, state.angular_velocity);
}

pub(crate) fn get_body_state(buf: &mut impl Buf) -> Result<(u32, BodyState), ProtocolError> {
    ensure(buf, FULL_BODY_STATE_LEN)?;
    let handle = buf.get_u32_le();
    let state = BodyState {
        position: get_vec3(buf)?,
        rotation: get_quat(buf)?,
        linear_velocity: get_vec3(buf)?,
        angular_velocity: get_vec3(buf)?,
    };
    Ok((handle, state))
}

pub(crate) fn put_count(buf: &mut impl BufMut, count: usize) {
    debug_assert!(count <= u16::MAX as usize, "list of {count} items overflows u16");
    buf.put_u16_le(count.min(u16::MAX as usize) as u16);
}

pub(crate) fn get_count(buf: &mut impl Buf) -> Result<usize, ProtocolError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le() as usize)
}

use glam::Vec3;
use rapier3d::dynamics::RigidBodyHandle;

use crate::player::InputState;

use super::{BodyDesc, BodyState, PlayerBodies};

/// The physics collaborator the tick driver advances once per tick.
///
/// Calls are synchronous; an implementation may parallelize internally but
/// must have finished all work when `step` returns.
pub trait Simulation {
    fn step(&mut self, dt: f32);

    fn spawn_body(&mut self, desc: &BodyDesc) -> RigidBodyHandle;

    fn spawn_player(&mut self, position: Vec3) -> PlayerBodies;

    fn remove_body(&mut self, handle: RigidBodyHandle);

    fn body_state(&self, handle: RigidBodyHandle) -> Option<BodyState>;

    /// Feeds a player's latest input into its bodies ahead of `step`.
    fn drive_player(&mut self, bodies: PlayerBodies, input: &InputState, dt: f32);
}

use glam::Vec3;
use rapier3d::dynamics::RigidBodyHandle;

use crate::player::{InputFlags, InputState, PlayerConfig};

use super::{BodyDesc, BodyState, PlayerBodies, Simulation};

#[derive(Debug, Clone)]
struct ScriptedBody {
    generation: u32,
    state: Option<BodyState>,
}

/// Collision-free stand-in for [`super::PhysicsWorld`].
///
/// Bodies move in straight lines at their stored velocity; states can be
/// overwritten directly. Handles follow rapier's index/generation scheme.
#[derive(Debug, Default)]
pub struct ScriptedSimulation {
    bodies: Vec<ScriptedBody>,
    free: Vec<u32>,
    steps: u64,
    player_config: PlayerConfig,
}

impl ScriptedSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn live_bodies(&self) -> usize {
        self.bodies.iter().filter(|b| b.state.is_some()).count()
    }

    pub fn set_state(&mut self, handle: RigidBodyHandle, state: BodyState) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.state = Some(state);
        }
    }

    fn insert(&mut self, state: BodyState) -> RigidBodyHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.bodies[index as usize];
            slot.state = Some(state);
            return RigidBodyHandle::from_raw_parts(index, slot.generation);
        }

        let index = self.bodies.len() as u32;
        self.bodies.push(ScriptedBody {
            generation: 0,
            state: Some(state),
        });
        RigidBodyHandle::from_raw_parts(index, 0)
    }

    fn slot(&self, handle: RigidBodyHandle) -> Option<&ScriptedBody> {
        let (index, generation) = handle.into_raw_parts();
        self.bodies
            .get(index as usize)
            .filter(|slot| slot.generation == generation)
    }

    fn slot_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut ScriptedBody> {
        let (index, generation) = handle.into_raw_parts();
        self.bodies
            .get_mut(index as usize)
            .filter(|slot| slot.generation == generation)
    }
}

impl Simulation for ScriptedSimulation {
    fn step(&mut self, dt: f32) {
        for body in &mut self.bodies {
            if let Some(state) = &mut body.state {
                state.position += state.linear_velocity * dt;
            }
        }
        self.steps += 1;
    }

    fn spawn_body(&mut self, desc: &BodyDesc) -> RigidBodyHandle {
        let mut state = BodyState::at(desc.position);
        state.rotation = desc.rotation;
        self.insert(state)
    }

    fn spawn_player(&mut self, position: Vec3) -> PlayerBodies {
        let avatar = self.insert(BodyState::at(position));
        let attachment = self.insert(BodyState::at(position + self.player_config.attachment_offset));
        PlayerBodies { avatar, attachment }
    }

    fn remove_body(&mut self, handle: RigidBodyHandle) {
        let (index, _) = handle.into_raw_parts();
        let removed = match self.slot_mut(handle) {
            Some(slot) if slot.state.is_some() => {
                slot.state = None;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            _ => false,
        };
        if removed {
            self.free.push(index);
        }
    }

    fn body_state(&self, handle: RigidBodyHandle) -> Option<BodyState> {
        self.slot(handle).and_then(|slot| slot.state)
    }

    fn drive_player(&mut self, bodies: PlayerBodies, input: &InputState, _dt: f32) {
        let velocity =
            input.move_direction() * self.player_config.speed(input.has(InputFlags::SPRINT));
        for handle in [bodies.avatar, bodies.attachment] {
            if let Some(state) = self.slot_mut(handle).and_then(|slot| slot.state.as_mut()) {
                state.linear_velocity = velocity;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::BodyShape;

    #[test]
    fn stale_handle_is_rejected_after_reuse() {
        let mut sim = ScriptedSimulation::new();
        let desc = BodyDesc::dynamic(BodyShape::Sphere { radius: 1.0 }, Vec3::ZERO, 1.0);
        let first = sim.spawn_body(&desc);
        sim.remove_body(first);
        let second = sim.spawn_body(&desc);

        assert!(sim.body_state(first).is_none());
        assert!(sim.body_state(second).is_some());
    }

    #[test]
    fn step_integrates_velocity() {
        let mut sim = ScriptedSimulation::new();
        let bodies = sim.spawn_player(Vec3::ZERO);
        sim.drive_player(bodies, &InputState::new(InputFlags::FORWARD, Vec3::NEG_Z), 0.5);
        sim.step(0.5);

        let avatar = sim.body_state(bodies.avatar).unwrap();
        assert!((avatar.position.z + 2.5).abs() < 0.0001);
        assert_eq!(sim.steps(), 1);
    }
}

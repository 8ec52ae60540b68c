use glam::{Quat, Vec3};
use rapier3d::prelude::*;

use crate::player::{InputFlags, InputState, PlayerConfig};

use super::{BodyDesc, BodyKind, BodyShape, BodyState, PlayerBodies, Simulation};

pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
    player_config: PlayerConfig,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl PhysicsWorld {
    const DEFAULT_DT: Real = 1.0 / 60.0;

    pub fn new(player_config: PlayerConfig) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = Self::DEFAULT_DT;
        integration_parameters.min_ccd_dt = Self::DEFAULT_DT / 100.0;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(0.0, -9.81, 0.0),
            player_config,
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn insert_with_collider(&mut self, body: RigidBody, collider: Collider) -> RigidBodyHandle {
        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        handle
    }

    fn collider_for(shape: &BodyShape) -> ColliderBuilder {
        match *shape {
            BodyShape::Box { half_extents } => {
                ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            BodyShape::Capsule {
                half_height,
                radius,
            } => ColliderBuilder::capsule_y(half_height, radius),
            BodyShape::Sphere { radius } => ColliderBuilder::ball(radius),
            BodyShape::Cylinder {
                half_height,
                radius,
            } => ColliderBuilder::cylinder(half_height, radius),
        }
    }

    fn pose(position: Vec3, rotation: Quat) -> Pose {
        let rot = Rotation::from_xyzw(rotation.x, rotation.y, rotation.z, rotation.w).normalize();
        Pose::from_parts(Vector::new(position.x, position.y, position.z), rot)
    }

    fn set_next_kinematic_pose(&mut self, handle: RigidBodyHandle, position: Vec3, rotation: Quat) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_next_kinematic_position(Self::pose(position, rotation));
        }
    }

    fn body_position(&self, handle: RigidBodyHandle) -> Option<Vec3> {
        self.bodies.get(handle).map(|b| {
            let t = b.translation();
            Vec3::new(t.x, t.y, t.z)
        })
    }
}

impl Simulation for PhysicsWorld {
    fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.integration_parameters.min_ccd_dt = dt / 100.0;

        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    fn spawn_body(&mut self, desc: &BodyDesc) -> RigidBodyHandle {
        let builder = match desc.kind {
            BodyKind::Static => RigidBodyBuilder::fixed(),
            BodyKind::Dynamic { .. } => RigidBodyBuilder::dynamic().ccd_enabled(true),
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based(),
        };
        let (axis, angle) = desc.rotation.to_axis_angle();
        let scaled_axis = axis * angle;
        let body = builder
            .translation(Vector::new(desc.position.x, desc.position.y, desc.position.z))
            .rotation(Vector::new(scaled_axis.x, scaled_axis.y, scaled_axis.z))
            .build();

        let mut collider = Self::collider_for(&desc.shape);
        if let BodyKind::Dynamic { mass } = desc.kind {
            collider = collider.mass(mass).friction(0.5).restitution(0.3);
        }

        self.insert_with_collider(body, collider.build())
    }

    fn spawn_player(&mut self, position: Vec3) -> PlayerBodies {
        let config = self.player_config.clone();

        let avatar = RigidBodyBuilder::kinematic_position_based()
            .translation(Vector::new(position.x, position.y, position.z))
            .lock_rotations()
            .build();
        let avatar_collider = ColliderBuilder::cylinder(config.player_height / 2.0, config.player_radius)
            .friction(0.0)
            .build();
        let avatar = self.insert_with_collider(avatar, avatar_collider);

        let held = position + config.attachment_offset;
        let attachment = RigidBodyBuilder::kinematic_position_based()
            .translation(Vector::new(held.x, held.y, held.z))
            .build();
        let attachment_collider = ColliderBuilder::ball(config.attachment_radius)
            .sensor(true)
            .build();
        let attachment = self.insert_with_collider(attachment, attachment_collider);

        PlayerBodies { avatar, attachment }
    }

    fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    fn body_state(&self, handle: RigidBodyHandle) -> Option<BodyState> {
        self.bodies.get(handle).map(|b| {
            let t = b.translation();
            let r = b.rotation();
            let v = b.linvel();
            let w = b.angvel();
            BodyState {
                position: Vec3::new(t.x, t.y, t.z),
                rotation: Quat::from_xyzw(r.x, r.y, r.z, r.w),
                linear_velocity: Vec3::new(v.x, v.y, v.z),
                angular_velocity: Vec3::new(w.x, w.y, w.z),
            }
        })
    }

    fn drive_player(&mut self, bodies: PlayerBodies, input: &InputState, dt: f32) {
        let Some(current) = self.body_position(bodies.avatar) else {
            return;
        };

        let speed = self.player_config.speed(input.has(InputFlags::SPRINT));
        let next = current + input.move_direction() * speed * dt;

        let yaw = (-input.view.x).atan2(-input.view.z);
        let facing = Quat::from_rotation_y(yaw);
        self.set_next_kinematic_pose(bodies.avatar, next, facing);

        let held = next + facing * self.player_config.attachment_offset;
        self.set_next_kinematic_pose(bodies.attachment, held, facing);
    }
}

use glam::{Quat, Vec3};
use rapier3d::dynamics::RigidBodyHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShapeKind {
    Box = 0,
    Capsule = 1,
    Sphere = 2,
    Cylinder = 3,
}

impl TryFrom<u8> for ShapeKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Box),
            1 => Ok(Self::Capsule),
            2 => Ok(Self::Sphere),
            3 => Ok(Self::Cylinder),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodyShape {
    Box { half_extents: Vec3 },
    Capsule { half_height: f32, radius: f32 },
    Sphere { radius: f32 },
    Cylinder { half_height: f32, radius: f32 },
}

impl BodyShape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Box { .. } => ShapeKind::Box,
            Self::Capsule { .. } => ShapeKind::Capsule,
            Self::Sphere { .. } => ShapeKind::Sphere,
            Self::Cylinder { .. } => ShapeKind::Cylinder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodyKind {
    Static,
    Dynamic { mass: f32 },
    Kinematic,
}

impl BodyKind {
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub shape: BodyShape,
    pub kind: BodyKind,
    pub position: Vec3,
    pub rotation: Quat,
}

impl BodyDesc {
    pub fn fixed(shape: BodyShape, position: Vec3) -> Self {
        Self {
            shape,
            kind: BodyKind::Static,
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn dynamic(shape: BodyShape, position: Vec3, mass: f32) -> Self {
        Self {
            shape,
            kind: BodyKind::Dynamic { mass },
            position,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Pose and velocity of a body at the end of a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }
}

impl BodyState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerBodies {
    pub avatar: RigidBodyHandle,
    pub attachment: RigidBodyHandle,
}

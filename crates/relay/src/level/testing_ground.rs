use glam::{Quat, Vec3};

use crate::physics::{BodyDesc, BodyShape};

use super::Level;

/// Flat arena with a row of obstacles, a staircase and a field of loose
/// props cycling through every body shape.
pub struct TestingGround;

impl TestingGround {
    const GROUND_SIZE: f32 = 100.0;
    const GROUND_Y: f32 = 0.0;
    const PROP_ROW: usize = 10;
    const PROP_SPACING: f32 = 1.5;

    pub fn build(props: usize) -> Level {
        let mut level = Level::new();

        level.push(BodyDesc::fixed(
            BodyShape::Box {
                half_extents: Vec3::new(Self::GROUND_SIZE, 0.1, Self::GROUND_SIZE),
            },
            Vec3::new(0.0, Self::GROUND_Y, 0.0),
        ));

        Self::add_platform_obstacles(&mut level);
        Self::add_stair_platforms(&mut level);
        Self::add_pillars(&mut level);
        Self::add_dynamic_props(&mut level, props);

        level
    }

    fn add_platform_obstacles(level: &mut Level) {
        let steps = [
            (5.0, 0.25, 1.0),
            (8.0, 0.5, 1.0),
            (11.0, 1.0, 1.0),
            (14.0, 1.5, 1.5),
            (18.0, 2.0, 2.0),
        ];
        for (x, half_height, half_width) in steps {
            level.push(BodyDesc::fixed(
                BodyShape::Box {
                    half_extents: Vec3::new(half_width, half_height, half_width),
                },
                Vec3::new(x, half_height, 0.0),
            ));
        }
    }

    fn add_stair_platforms(level: &mut Level) {
        let stair_start = Vec3::new(-5.0, 0.0, 5.0);
        let step_height = 0.3;
        let step_depth = 0.4;
        let step_width = 2.0;

        for i in 0..10 {
            let y = step_height * (i as f32 + 0.5);
            let z = stair_start.z + step_depth * i as f32;
            level.push(BodyDesc::fixed(
                BodyShape::Box {
                    half_extents: Vec3::new(step_width, step_height * 0.5, step_depth * 0.5),
                },
                Vec3::new(stair_start.x, y, z),
            ));
        }
    }

    fn add_pillars(level: &mut Level) {
        for (i, x) in [-12.0, 12.0].into_iter().enumerate() {
            let mut pillar = BodyDesc::fixed(
                BodyShape::Cylinder {
                    half_height: 2.0,
                    radius: 0.5,
                },
                Vec3::new(x, 2.0, -12.0),
            );
            if i == 1 {
                pillar.rotation = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
            }
            level.push(pillar);
        }
    }

    fn add_dynamic_props(level: &mut Level, count: usize) {
        for i in 0..count {
            let column = (i % Self::PROP_ROW) as f32;
            let row = (i / Self::PROP_ROW) as f32;
            let position = Vec3::new(
                -7.0 + column * Self::PROP_SPACING,
                1.0 + (i % 3) as f32 * 0.5,
                -5.0 - row * Self::PROP_SPACING,
            );

            let (shape, mass) = match i % 4 {
                0 => (
                    BodyShape::Box {
                        half_extents: Vec3::splat(0.25 + 0.05 * (i % 3) as f32),
                    },
                    3.0,
                ),
                1 => (BodyShape::Sphere { radius: 0.3 }, 2.0),
                2 => (
                    BodyShape::Capsule {
                        half_height: 0.3,
                        radius: 0.2,
                    },
                    2.5,
                ),
                _ => (
                    BodyShape::Cylinder {
                        half_height: 0.25,
                        radius: 0.3,
                    },
                    4.0,
                ),
            };
            level.push(BodyDesc::dynamic(shape, position, mass));
        }
    }
}

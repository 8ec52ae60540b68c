use glam::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub walk_speed: f32,
    pub sprint_speed: f32,

    pub player_radius: f32,
    pub player_height: f32,

    pub attachment_radius: f32,
    pub attachment_offset: Vec3,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            walk_speed: 5.0,
            sprint_speed: 10.0,

            player_radius: 0.3,
            player_height: 1.8,

            attachment_radius: 0.15,
            attachment_offset: Vec3::new(0.4, 1.2, 0.0),
        }
    }
}

impl PlayerConfig {
    pub fn speed(&self, sprinting: bool) -> f32 {
        if sprinting {
            self.sprint_speed
        } else {
            self.walk_speed
        }
    }
}

use bitflags::bitflags;
use glam::Vec3;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputFlags: u8 {
        const FORWARD = 1 << 0;
        const BACK = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const SPRINT = 1 << 4;
        const JUMP = 1 << 5;
        const FIRE = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputState {
    pub flags: InputFlags,
    pub view: Vec3,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            flags: InputFlags::empty(),
            view: Vec3::NEG_Z,
        }
    }
}

impl InputState {
    pub fn new(flags: InputFlags, view: Vec3) -> Self {
        Self { flags, view }
    }

    #[inline]
    pub fn has(&self, flag: InputFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Horizontal movement direction in world space, derived from the
    /// movement flags relative to the view direction. Zero when idle or when
    /// opposing keys cancel out.
    pub fn move_direction(&self) -> Vec3 {
        let mut local = Vec3::ZERO;
        if self.has(InputFlags::FORWARD) {
            local.z += 1.0;
        }
        if self.has(InputFlags::BACK) {
            local.z -= 1.0;
        }
        if self.has(InputFlags::RIGHT) {
            local.x += 1.0;
        }
        if self.has(InputFlags::LEFT) {
            local.x -= 1.0;
        }
        if local.length_squared() < 0.001 {
            return Vec3::ZERO;
        }

        let forward = Vec3::new(self.view.x, 0.0, self.view.z).normalize_or_zero();
        if forward == Vec3::ZERO {
            return Vec3::ZERO;
        }
        let right = forward.cross(Vec3::Y);
        (forward * local.z + right * local.x).normalize_or_zero()
    }
}

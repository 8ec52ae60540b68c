mod testing_ground;

pub use testing_ground::TestingGround;

use crate::physics::BodyDesc;

/// Body descriptions a server registers on load. Static entries go out once
/// in the join response, dynamic entries are replicated every tick.
#[derive(Debug, Clone, Default)]
pub struct Level {
    bodies: Vec<BodyDesc>,
}

impl Level {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, desc: BodyDesc) -> &mut Self {
        self.bodies.push(desc);
        self
    }

    pub fn bodies(&self) -> &[BodyDesc] {
        &self.bodies
    }

    pub fn static_count(&self) -> usize {
        self.bodies.iter().filter(|b| b.kind.is_static()).count()
    }

    pub fn dynamic_count(&self) -> usize {
        self.bodies.len() - self.static_count()
    }
}

impl FromIterator<BodyDesc> for Level {
    fn from_iter<I: IntoIterator<Item = BodyDesc>>(iter: I) -> Self {
        Self {
            bodies: iter.into_iter().collect(),
        }
    }
}

mod body;
mod scripted;
mod simulation;
mod world;

pub use body::{BodyDesc, BodyKind, BodyShape, BodyState, PlayerBodies, ShapeKind};
pub use scripted::ScriptedSimulation;
pub use simulation::Simulation;
pub use world::PhysicsWorld;

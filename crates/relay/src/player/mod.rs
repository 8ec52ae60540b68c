mod config;
mod input;

pub use config::PlayerConfig;
pub use input::{InputFlags, InputState};

mod events;
mod pacer;
mod session;

pub use events::{DisconnectReason, ServerEvent};
pub use pacer::TickPacer;
pub use session::{ClientSendReport, Server, ServerStats};

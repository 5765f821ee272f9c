//! Host command protocol (JSON over WebSocket)

mod messages;

pub use messages::*;

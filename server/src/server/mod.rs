//! WebSocket front end for the host

mod websocket;

pub use websocket::{AppState, Connection, ConnectionRegistry, WsConfig, ws_handler};

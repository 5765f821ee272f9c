//! Tile Overlay Bridge Library
//!
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod config;
pub mod overlay;
pub mod protocol;
pub mod server;
pub mod surface;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use overlay::{
    OverlayConfig, OverlayError, OverlayOptions, OverlayRegistry, ProducerChannel, TileCoordinate,
    TileProvider, TileRequestChannel,
};
pub use protocol::{HostMessage, ServerMessage};
pub use server::AppState;
pub use surface::{RenderSurface, SurfaceAppState, TileSurface, surface_routes};

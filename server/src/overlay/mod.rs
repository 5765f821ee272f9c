//! Tile overlay core
//!
//! Handles the lifecycle, configuration and tile fetching of host-defined
//! tile overlays:
//! - `channel`: asynchronous bridge to the external tile producer
//! - `provider`: per-overlay tile fetch capability handed to the surface
//! - `controller`: per-overlay configuration and attach/detach lifecycle
//! - `registry`: owner of all overlays, driven by host batches

pub mod channel;
pub mod controller;
pub mod provider;
pub mod registry;
pub mod types;

pub use channel::{
    DEFAULT_PRODUCER_QUEUE_SIZE, ProducerChannel, ProducerRequest, ProducerTile, TileFetch,
    TileRequestChannel,
};
pub use controller::{OverlayController, OverlayState};
pub use provider::TileProvider;
pub use registry::{OverlayEntry, OverlayRegistry, Rejection};
pub use types::{
    DEFAULT_TILE_SIZE, OverlayConfig, OverlayError, OverlayId, OverlayOptions, ProvidedTile,
    Tile, TileCoordinate, TileResult,
};

//! Per-overlay tile provider
//!
//! Adapts the rendering surface's "give me this tile" call into an
//! asynchronous fetch through the `TileRequestChannel`. The provider holds no
//! cache; fetch failures of any kind come back as `ProvidedTile::NoTile`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, warn};

use super::channel::{TileFetch, TileRequestChannel};
use super::types::{OverlayId, ProvidedTile, Tile, TileCoordinate, TileResult};

/// Tile fetch capability of a single overlay
pub struct TileProvider {
    overlay_id: OverlayId,
    tile_size: AtomicU32,
    channel: Arc<dyn TileRequestChannel>,
    fetch_timeout: Option<Duration>,
}

impl TileProvider {
    pub fn new(
        overlay_id: OverlayId,
        tile_size: u32,
        channel: Arc<dyn TileRequestChannel>,
        fetch_timeout: Option<Duration>,
    ) -> Self {
        Self {
            overlay_id,
            tile_size: AtomicU32::new(tile_size),
            channel,
            fetch_timeout,
        }
    }

    pub fn overlay_id(&self) -> &OverlayId {
        &self.overlay_id
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size.load(Ordering::Relaxed)
    }

    /// Only affects fetches started after the call
    pub(crate) fn set_tile_size(&self, tile_size: u32) {
        self.tile_size.store(tile_size, Ordering::Relaxed);
    }

    /// Fetch one tile. Returns immediately with a task resolving to the tile
    /// or to `NoTile`.
    pub fn get_tile(&self, coordinate: TileCoordinate) -> TileFetch<ProvidedTile> {
        // Stamp the size now so a later resize does not leak into this request
        let tile_size = self.tile_size();
        let mut fetch = self.channel.fetch(&self.overlay_id, coordinate);
        let overlay_id = self.overlay_id.clone();
        let fetch_timeout = self.fetch_timeout;

        TileFetch::spawn(async move {
            let start = Instant::now();
            let result = match fetch_timeout {
                Some(limit) => {
                    let outcome = tokio::time::timeout(limit, &mut fetch).await;
                    match outcome {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(
                                "Tile fetch for {} at zoom={} x={} y={} timed out after {:?}",
                                overlay_id, coordinate.zoom, coordinate.x, coordinate.y, limit
                            );
                            fetch.abort();
                            counter!("tile_overlay_fetch_timeouts_total").increment(1);
                            TileResult::Absent
                        }
                    }
                }
                None => fetch.await,
            };
            histogram!("tile_overlay_fetch_duration_seconds").record(start.elapsed());

            match result {
                TileResult::Present(data) => {
                    counter!("tile_overlay_fetch_total", "result" => "present").increment(1);
                    ProvidedTile::Tile(Tile { data, tile_size })
                }
                TileResult::Absent => {
                    debug!(
                        "No tile for {} at zoom={} x={} y={}",
                        overlay_id, coordinate.zoom, coordinate.x, coordinate.y
                    );
                    counter!("tile_overlay_fetch_total", "result" => "absent").increment(1);
                    ProvidedTile::NoTile
                }
            }
        })
    }
}

impl std::fmt::Debug for TileProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileProvider")
            .field("overlay_id", &self.overlay_id)
            .field("tile_size", &self.tile_size())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

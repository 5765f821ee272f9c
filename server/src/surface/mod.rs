//! Rendering surface capability and its in-memory implementation
//!
//! This module provides:
//! - `RenderSurface` trait, the narrow capability overlay controllers apply
//!   their lifecycle and configuration to
//! - `TileSurface`, a surface that keeps one layer per attached overlay,
//!   fetches tiles through each layer's `TileProvider` and caches them
//! - HTTP routes serving the surface's tiles and draw order

pub mod routes;
mod tile_cache;

use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::overlay::{
    OverlayConfig, OverlayError, OverlayId, ProvidedTile, TileCoordinate, TileProvider,
};

pub use routes::{SurfaceAppState, surface_routes};
pub use tile_cache::{LayerTileCache, TileCacheConfig, TileCacheStats};

/// What an overlay controller needs from the map rendering surface.
///
/// Every call takes effect before it returns.
pub trait RenderSurface: Send + Sync {
    /// Register an overlay layer that fetches through `provider`
    fn attach(&self, provider: Arc<TileProvider>, config: &OverlayConfig);

    /// Replace the configuration of an attached overlay
    fn apply_config(&self, overlay_id: &OverlayId, config: &OverlayConfig);

    /// Unregister an overlay layer
    fn detach(&self, overlay_id: &OverlayId);

    /// Discard cached tiles of one overlay so they are fetched again
    fn clear_tile_cache(&self, overlay_id: &OverlayId);
}

struct SurfaceLayer {
    provider: Arc<TileProvider>,
    config: OverlayConfig,
    cache: Arc<LayerTileCache>,
}

/// Attached overlay as listed in the draw order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSnapshot {
    pub overlay_id: OverlayId,
    #[serde(flatten)]
    pub config: OverlayConfig,
}

/// In-memory rendering surface with a tile cache per overlay
pub struct TileSurface {
    layers: DashMap<OverlayId, SurfaceLayer>,
    cache_config: TileCacheConfig,
}

impl TileSurface {
    pub fn new(cache_config: TileCacheConfig) -> Self {
        Self {
            layers: DashMap::new(),
            cache_config,
        }
    }

    /// Request a tile the way the renderer does while drawing.
    ///
    /// Serves from the overlay's cache when possible, otherwise fetches through
    /// the overlay's provider. Hidden overlays draw nothing.
    pub async fn request_tile(
        &self,
        overlay_id: &str,
        coordinate: TileCoordinate,
    ) -> Result<ProvidedTile, OverlayError> {
        // Never hold the map guard across an await
        let (provider, cache, visible) = {
            let layer = self
                .layers
                .get(overlay_id)
                .ok_or_else(|| OverlayError::UnknownOverlayId(overlay_id.to_string()))?;
            (
                Arc::clone(&layer.provider),
                Arc::clone(&layer.cache),
                layer.config.visible,
            )
        };

        if !visible {
            return Ok(ProvidedTile::NoTile);
        }

        if let Some(tile) = cache.get(&coordinate).await {
            return Ok(tile);
        }

        let generation = cache.generation();
        let tile = provider.get_tile(coordinate).await;
        cache
            .insert_if_current(coordinate, tile.clone(), generation)
            .await;

        Ok(tile)
    }

    /// Visible overlays, bottom-most first
    pub fn draw_order(&self) -> Vec<LayerSnapshot> {
        let mut layers: Vec<LayerSnapshot> = self
            .layers
            .iter()
            .filter(|layer| layer.config.visible)
            .map(|layer| LayerSnapshot {
                overlay_id: layer.key().clone(),
                config: layer.config.clone(),
            })
            .collect();
        layers.sort_by(|a, b| {
            a.config
                .z_index
                .cmp(&b.config.z_index)
                .then_with(|| a.overlay_id.cmp(&b.overlay_id))
        });
        layers
    }

    pub fn layer_config(&self, overlay_id: &str) -> Option<OverlayConfig> {
        self.layers.get(overlay_id).map(|layer| layer.config.clone())
    }

    pub fn is_attached(&self, overlay_id: &str) -> bool {
        self.layers.contains_key(overlay_id)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn cache_stats(&self, overlay_id: &str) -> Option<TileCacheStats> {
        self.layers.get(overlay_id).map(|layer| layer.cache.stats())
    }

    /// Publish per-overlay cache gauges (called periodically)
    pub fn update_gauges(&self) {
        gauge!("tile_overlay_layers_attached").set(self.layers.len() as f64);
        for layer in self.layers.iter() {
            layer.cache.update_gauges();
        }
    }
}

impl Default for TileSurface {
    fn default() -> Self {
        Self::new(TileCacheConfig::default())
    }
}

impl RenderSurface for TileSurface {
    fn attach(&self, provider: Arc<TileProvider>, config: &OverlayConfig) {
        let overlay_id = provider.overlay_id().clone();
        let layer = SurfaceLayer {
            cache: Arc::new(LayerTileCache::new(overlay_id.clone(), &self.cache_config)),
            provider,
            config: config.clone(),
        };

        if self.layers.insert(overlay_id.clone(), layer).is_some() {
            warn!("Overlay {} was already attached, replaced its layer", overlay_id);
        } else {
            info!("Attached overlay {} to the surface", overlay_id);
        }
        gauge!("tile_overlay_layers_attached").set(self.layers.len() as f64);
    }

    fn apply_config(&self, overlay_id: &OverlayId, config: &OverlayConfig) {
        match self.layers.get_mut(overlay_id) {
            Some(mut layer) => {
                layer.config = config.clone();
                debug!("Applied configuration to overlay {}: {:?}", overlay_id, config);
            }
            None => warn!("Configuration for unattached overlay {} ignored", overlay_id),
        }
    }

    fn detach(&self, overlay_id: &OverlayId) {
        if self.layers.remove(overlay_id).is_some() {
            info!("Detached overlay {} from the surface", overlay_id);
        }
        gauge!("tile_overlay_layers_attached").set(self.layers.len() as f64);
    }

    fn clear_tile_cache(&self, overlay_id: &OverlayId) {
        if let Some(layer) = self.layers.get(overlay_id) {
            layer.cache.clear();
        }
    }
}

//! Lifecycle and configuration of a single tile overlay

use std::sync::Arc;

use tracing::{debug, info};

use super::provider::TileProvider;
use super::types::{OverlayConfig, OverlayError, OverlayId, validate_tile_size, validate_transparency};
use crate::surface::RenderSurface;

/// Lifecycle of an overlay on the rendering surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    /// Constructed, not yet registered with the surface
    Created,
    Attached,
    /// Removed from the surface; terminal
    Detached,
}

/// Single point of mutation for one overlay's configuration and lifecycle.
///
/// Every setter validates its argument, updates the configuration and, while
/// attached, applies it to the surface before returning.
pub struct OverlayController {
    overlay_id: OverlayId,
    config: OverlayConfig,
    state: OverlayState,
    provider: Arc<TileProvider>,
    surface: Arc<dyn RenderSurface>,
}

impl OverlayController {
    pub fn new(
        config: OverlayConfig,
        provider: Arc<TileProvider>,
        surface: Arc<dyn RenderSurface>,
    ) -> Self {
        provider.set_tile_size(config.tile_size);
        Self {
            overlay_id: provider.overlay_id().clone(),
            config,
            state: OverlayState::Created,
            provider,
            surface,
        }
    }

    pub fn overlay_id(&self) -> &OverlayId {
        &self.overlay_id
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.state == OverlayState::Attached
    }

    pub fn provider(&self) -> &Arc<TileProvider> {
        &self.provider
    }

    /// Register the overlay with the surface. Only valid from `Created`.
    pub fn attach(&mut self) {
        if self.state != OverlayState::Created {
            debug!(
                "Overlay {} is {:?}, not attaching again",
                self.overlay_id, self.state
            );
            return;
        }
        self.surface.attach(Arc::clone(&self.provider), &self.config);
        self.state = OverlayState::Attached;
    }

    pub fn set_fade_in(&mut self, fade_in: bool) {
        self.config.fade_in = fade_in;
        self.apply();
    }

    /// Rejects values outside [0, 1], keeping the previous value
    pub fn set_transparency(&mut self, transparency: f32) -> Result<(), OverlayError> {
        self.config.transparency = validate_transparency(transparency)?;
        self.apply();
        Ok(())
    }

    pub fn set_z_index(&mut self, z_index: i32) {
        self.config.z_index = z_index;
        self.apply();
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.config.visible = visible;
        self.apply();
    }

    /// Requires a positive size. Tiles already fetched keep their size.
    pub fn set_tile_size(&mut self, tile_size: i64) -> Result<(), OverlayError> {
        let tile_size = validate_tile_size(tile_size)?;
        self.config.tile_size = tile_size;
        self.provider.set_tile_size(tile_size);
        self.apply();
        Ok(())
    }

    /// Detach from the surface. Calling it again, or before attaching, only
    /// marks the controller detached.
    pub fn remove_overlay(&mut self) {
        match self.state {
            OverlayState::Attached => {
                self.surface.detach(&self.overlay_id);
                info!("Removed tile overlay {}", self.overlay_id);
            }
            OverlayState::Created => {
                debug!("Tile overlay {} removed before attach", self.overlay_id);
            }
            OverlayState::Detached => return,
        }
        self.state = OverlayState::Detached;
    }

    /// Ask the surface to drop this overlay's cached tiles. No-op unless attached.
    pub fn clear_tile_cache(&self) {
        if self.is_attached() {
            self.surface.clear_tile_cache(&self.overlay_id);
            debug!("Cleared tile cache of overlay {}", self.overlay_id);
        }
    }

    fn apply(&self) {
        // Configuration set before attach is applied by attach itself
        if self.is_attached() {
            self.surface.apply_config(&self.overlay_id, &self.config);
        }
    }
}

impl std::fmt::Debug for OverlayController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayController")
            .field("overlay_id", &self.overlay_id)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

//! Registry of the tile overlays requested by the host
//!
//! The registry is the sole owner of the mapping from overlay id to its
//! controller and provider. It processes the host's batched add, change and
//! remove requests one descriptor at a time: a rejected descriptor is reported
//! and the rest of the batch continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use super::channel::TileRequestChannel;
use super::controller::{OverlayController, OverlayState};
use super::provider::TileProvider;
use super::types::{OverlayConfig, OverlayError, OverlayId, OverlayOptions};
use crate::surface::RenderSurface;

/// One registered overlay
pub struct OverlayEntry {
    controller: OverlayController,
    provider: Arc<TileProvider>,
}

impl OverlayEntry {
    pub fn overlay_id(&self) -> &OverlayId {
        self.controller.overlay_id()
    }

    pub fn config(&self) -> &OverlayConfig {
        self.controller.config()
    }

    pub fn state(&self) -> OverlayState {
        self.controller.state()
    }

    pub fn is_attached(&self) -> bool {
        self.controller.is_attached()
    }

    pub fn provider(&self) -> &Arc<TileProvider> {
        &self.provider
    }
}

/// A batch entry the registry refused, with the reason
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub overlay_id: OverlayId,
    pub error: OverlayError,
}

impl Rejection {
    fn new(overlay_id: &OverlayId, error: OverlayError) -> Self {
        Self {
            overlay_id: overlay_id.clone(),
            error,
        }
    }
}

/// Owner of every overlay entry, driven by host batches
pub struct OverlayRegistry {
    entries: HashMap<OverlayId, OverlayEntry>,
    channel: Arc<dyn TileRequestChannel>,
    surface: Arc<dyn RenderSurface>,
    fetch_timeout: Option<Duration>,
}

impl OverlayRegistry {
    pub fn new(channel: Arc<dyn TileRequestChannel>, surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            entries: HashMap::new(),
            channel,
            surface,
            fetch_timeout: None,
        }
    }

    /// Give up on tile fetches of newly added overlays after `timeout`
    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Create and attach one overlay per descriptor.
    ///
    /// Returns the rejected descriptors, in batch order.
    pub fn add_overlays(&mut self, descriptors: Vec<OverlayOptions>) -> Vec<Rejection> {
        let mut rejections = Vec::new();

        for options in descriptors {
            if let Err(e) = self.add_overlay(&options) {
                warn!("Rejected tile overlay add: {}", e);
                counter!("tile_overlay_commands_rejected_total", "op" => "add").increment(1);
                rejections.push(Rejection::new(&options.tile_overlay_id, e));
            }
        }

        self.update_gauge();
        rejections
    }

    fn add_overlay(&mut self, options: &OverlayOptions) -> Result<(), OverlayError> {
        let overlay_id = &options.tile_overlay_id;
        if self.entries.contains_key(overlay_id) {
            return Err(OverlayError::DuplicateOverlayId(overlay_id.clone()));
        }
        let config = OverlayConfig::from_options(options)?;

        let provider = Arc::new(TileProvider::new(
            overlay_id.clone(),
            config.tile_size,
            Arc::clone(&self.channel),
            self.fetch_timeout,
        ));
        let mut controller =
            OverlayController::new(config, Arc::clone(&provider), Arc::clone(&self.surface));
        controller.attach();

        info!(
            "Added tile overlay {} (z_index={}, visible={})",
            overlay_id,
            controller.config().z_index,
            controller.config().visible
        );
        counter!("tile_overlay_overlays_added_total").increment(1);

        self.entries.insert(
            overlay_id.clone(),
            OverlayEntry {
                controller,
                provider,
            },
        );
        Ok(())
    }

    /// Apply the present fields of each descriptor to its overlay.
    ///
    /// A descriptor with any invalid value changes nothing.
    pub fn change_overlays(&mut self, descriptors: Vec<OverlayOptions>) -> Vec<Rejection> {
        let mut rejections = Vec::new();

        for options in descriptors {
            let result = match self.entries.get_mut(&options.tile_overlay_id) {
                Some(entry) => apply_change(&mut entry.controller, &options),
                None => Err(OverlayError::UnknownOverlayId(options.tile_overlay_id.clone())),
            };

            if let Err(e) = result {
                warn!("Rejected tile overlay change: {}", e);
                counter!("tile_overlay_commands_rejected_total", "op" => "change").increment(1);
                rejections.push(Rejection::new(&options.tile_overlay_id, e));
            }
        }

        rejections
    }

    /// Detach and forget each overlay. Unknown ids are ignored.
    ///
    /// Returns how many overlays were removed.
    pub fn remove_overlay_ids(&mut self, overlay_ids: Vec<OverlayId>) -> usize {
        let mut removed = 0;

        for overlay_id in overlay_ids {
            match self.entries.remove(&overlay_id) {
                Some(mut entry) => {
                    entry.controller.remove_overlay();
                    counter!("tile_overlay_overlays_removed_total").increment(1);
                    removed += 1;
                }
                None => debug!("Ignoring removal of unknown tile overlay {}", overlay_id),
            }
        }

        self.update_gauge();
        removed
    }

    /// Drop the surface's cached tiles of one overlay. Unknown ids are ignored.
    pub fn clear_tile_cache(&self, overlay_id: &str) {
        match self.entries.get(overlay_id) {
            Some(entry) => entry.controller.clear_tile_cache(),
            None => debug!("Ignoring cache clear of unknown tile overlay {}", overlay_id),
        }
    }

    pub fn contains(&self, overlay_id: &str) -> bool {
        self.entries.contains_key(overlay_id)
    }

    pub fn entry(&self, overlay_id: &str) -> Option<&OverlayEntry> {
        self.entries.get(overlay_id)
    }

    pub fn config(&self, overlay_id: &str) -> Option<&OverlayConfig> {
        self.entries.get(overlay_id).map(OverlayEntry::config)
    }

    /// Registered ids, sorted
    pub fn overlay_ids(&self) -> Vec<OverlayId> {
        let mut ids: Vec<OverlayId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update_gauge(&self) {
        gauge!("tile_overlay_overlays_active").set(self.entries.len() as f64);
    }
}

impl Drop for OverlayRegistry {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        info!("Tearing down {} tile overlays", self.entries.len());
        for (_, mut entry) in self.entries.drain() {
            entry.controller.remove_overlay();
        }
        gauge!("tile_overlay_overlays_active").set(0.0);
    }
}

fn apply_change(
    controller: &mut OverlayController,
    options: &OverlayOptions,
) -> Result<(), OverlayError> {
    // Validate the whole descriptor before touching anything
    controller.config().merged(options)?;

    if let Some(fade_in) = options.fade_in {
        controller.set_fade_in(fade_in);
    }
    if let Some(transparency) = options.transparency {
        controller.set_transparency(transparency)?;
    }
    if let Some(z_index) = options.z_index {
        controller.set_z_index(z_index);
    }
    if let Some(visible) = options.visible {
        controller.set_visible(visible);
    }
    if let Some(tile_size) = options.tile_size {
        controller.set_tile_size(tile_size)?;
    }

    debug!(
        "Changed tile overlay {}: {:?}",
        controller.overlay_id(),
        controller.config()
    );
    Ok(())
}

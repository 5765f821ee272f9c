//! Per-overlay tile cache of the rendering surface
//!
//! Each attached overlay gets its own cache so that clearing one overlay can
//! never touch the tiles of another.
//!
//! Key features:
//! - Concurrent access without global lock (sharded internally by moka)
//! - Size-based eviction (counts tile bytes plus a fixed per-entry overhead)
//! - Absent tiles are cached too; they are a valid answer
//! - A generation counter, bumped on every clear, keeps results of fetches
//!   started before the clear out of the cache

use metrics::{counter, gauge};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::overlay::{OverlayId, ProvidedTile, TileCoordinate};

/// Bytes charged for every entry on top of its tile data
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// Configuration for the tile caches
#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    /// Maximum cache size in bytes per overlay (default: 64MB)
    pub max_size_bytes: u64,
    /// Time-to-live for cache entries (default: 1 hour)
    pub ttl: Duration,
    /// Time-to-idle: evict entries not accessed for this duration (default: 15 min)
    pub tti: Duration,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024, // 64 MB
            ttl: Duration::from_secs(3600),   // 1 hour
            tti: Duration::from_secs(900),    // 15 minutes
        }
    }
}

/// Tile cache of one overlay, keyed by tile coordinate
pub struct LayerTileCache {
    overlay_id: OverlayId,
    cache: Cache<TileCoordinate, ProvidedTile>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LayerTileCache {
    pub fn new(overlay_id: OverlayId, config: &TileCacheConfig) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &TileCoordinate, value: &ProvidedTile| -> u32 {
                (value.weight() + ENTRY_OVERHEAD_BYTES).min(u32::MAX as usize) as u32
            })
            .max_capacity(config.max_size_bytes)
            .time_to_live(config.ttl)
            .time_to_idle(config.tti)
            .build();

        Self {
            overlay_id,
            cache,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Current generation; capture it before starting a fetch
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Get a cached tile if present
    pub async fn get(&self, coordinate: &TileCoordinate) -> Option<ProvidedTile> {
        let result = self.cache.get(coordinate).await;

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("tile_overlay_cache_hits_total").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("tile_overlay_cache_misses_total").increment(1);
        }

        result
    }

    /// Insert the result of a fetch started at `generation`.
    ///
    /// Returns false, leaving the cache untouched, if the cache was cleared
    /// since then.
    pub async fn insert_if_current(
        &self,
        coordinate: TileCoordinate,
        tile: ProvidedTile,
        generation: u64,
    ) -> bool {
        if self.generation() != generation {
            debug!(
                "Discarding stale tile for {} at zoom={} x={} y={}",
                self.overlay_id, coordinate.zoom, coordinate.x, coordinate.y
            );
            counter!("tile_overlay_cache_stale_results_total").increment(1);
            return false;
        }

        self.cache.insert(coordinate, tile).await;

        // A clear may have slipped in while inserting
        if self.generation() != generation {
            self.cache.invalidate(&coordinate).await;
            counter!("tile_overlay_cache_stale_results_total").increment(1);
            return false;
        }
        true
    }

    /// Drop every cached tile of this overlay
    pub fn clear(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.cache.invalidate_all();
        counter!("tile_overlay_cache_clears_total").increment(1);
        debug!(
            "Cleared tile cache for {} (generation {})",
            self.overlay_id, generation
        );
    }

    /// Get the current hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
            generation: self.generation(),
        }
    }

    /// Publish size gauges for this overlay
    pub fn update_gauges(&self) {
        let overlay = self.overlay_id.clone();
        gauge!("tile_overlay_cache_hit_rate", "overlay" => overlay.clone()).set(self.hit_rate());
        gauge!("tile_overlay_cache_entry_count", "overlay" => overlay.clone())
            .set(self.cache.entry_count() as f64);
        gauge!("tile_overlay_cache_size_bytes", "overlay" => overlay)
            .set(self.cache.weighted_size() as f64);
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct TileCacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Number of entries in cache (approximate)
    pub entry_count: u64,
    /// Total size in bytes (approximate)
    pub weighted_size: u64,
    /// Number of clears so far
    pub generation: u64,
}

//! Overlay-related types and error definitions

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host-assigned overlay identifier, stable for the overlay's lifetime
pub type OverlayId = String;

/// Default edge length of a square tile in pixels
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Errors reported for overlay configuration and registry operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OverlayError {
    #[error("Unknown tile overlay: {0}")]
    UnknownOverlayId(OverlayId),

    #[error("Tile overlay already exists: {0}")]
    DuplicateOverlayId(OverlayId),

    #[error("Invalid value for {field}: {reason}")]
    InvalidConfigValue { field: &'static str, reason: String },

    #[error("Tile overlay {overlay_id} is missing required field {field}")]
    MissingField {
        overlay_id: OverlayId,
        field: &'static str,
    },
}

impl OverlayError {
    /// Stable machine-readable code used in host acknowledgements
    pub fn code(&self) -> &'static str {
        match self {
            OverlayError::UnknownOverlayId(_) => "unknown_overlay_id",
            OverlayError::DuplicateOverlayId(_) => "duplicate_overlay_id",
            OverlayError::InvalidConfigValue { .. } => "invalid_config_value",
            OverlayError::MissingField { .. } => "missing_field",
        }
    }
}

/// Live configuration of a single tile overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Ease tiles in when they transition from absent to present
    pub fade_in: bool,
    /// 0.0 is fully opaque, 1.0 fully transparent
    pub transparency: f32,
    /// Stacking order, higher is drawn above lower
    pub z_index: i32,
    pub visible: bool,
    /// Pixel edge length of a square tile
    pub tile_size: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            fade_in: true,
            transparency: 0.0,
            z_index: 0,
            visible: true,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

impl OverlayConfig {
    /// Build a complete configuration from an add descriptor.
    ///
    /// Every field must be present and within its domain.
    pub fn from_options(options: &OverlayOptions) -> Result<Self, OverlayError> {
        let missing = |field| OverlayError::MissingField {
            overlay_id: options.tile_overlay_id.clone(),
            field,
        };

        let transparency = options.transparency.ok_or_else(|| missing("transparency"))?;
        let tile_size = options.tile_size.ok_or_else(|| missing("tile_size"))?;

        Ok(Self {
            fade_in: options.fade_in.ok_or_else(|| missing("fade_in"))?,
            transparency: validate_transparency(transparency)?,
            z_index: options.z_index.ok_or_else(|| missing("z_index"))?,
            visible: options.visible.ok_or_else(|| missing("visible"))?,
            tile_size: validate_tile_size(tile_size)?,
        })
    }

    /// Return a copy of this configuration with the present fields of
    /// `options` applied, validating each of them.
    pub fn merged(&self, options: &OverlayOptions) -> Result<Self, OverlayError> {
        let mut config = self.clone();
        if let Some(fade_in) = options.fade_in {
            config.fade_in = fade_in;
        }
        if let Some(transparency) = options.transparency {
            config.transparency = validate_transparency(transparency)?;
        }
        if let Some(z_index) = options.z_index {
            config.z_index = z_index;
        }
        if let Some(visible) = options.visible {
            config.visible = visible;
        }
        if let Some(tile_size) = options.tile_size {
            config.tile_size = validate_tile_size(tile_size)?;
        }
        Ok(config)
    }
}

/// Check that a transparency value lies in [0, 1]
pub fn validate_transparency(value: f32) -> Result<f32, OverlayError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(OverlayError::InvalidConfigValue {
            field: "transparency",
            reason: format!("{} is outside [0, 1]", value),
        })
    }
}

/// Check that a tile size is a positive pixel count
pub fn validate_tile_size(value: i64) -> Result<u32, OverlayError> {
    if value <= 0 {
        return Err(OverlayError::InvalidConfigValue {
            field: "tile_size",
            reason: format!("{} is not positive", value),
        });
    }
    u32::try_from(value).map_err(|_| OverlayError::InvalidConfigValue {
        field: "tile_size",
        reason: format!("{} is too large", value),
    })
}

/// Overlay descriptor sent by the host.
///
/// On add every option is required; on change any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayOptions {
    pub tile_overlay_id: OverlayId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparency: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_size: Option<i64>,
}

impl OverlayOptions {
    /// Descriptor carrying only an id, for building change requests
    pub fn new(tile_overlay_id: impl Into<OverlayId>) -> Self {
        Self {
            tile_overlay_id: tile_overlay_id.into(),
            ..Default::default()
        }
    }

    /// Descriptor carrying every field of `config`
    pub fn from_config(tile_overlay_id: impl Into<OverlayId>, config: &OverlayConfig) -> Self {
        Self {
            tile_overlay_id: tile_overlay_id.into(),
            fade_in: Some(config.fade_in),
            transparency: Some(config.transparency),
            z_index: Some(config.z_index),
            visible: Some(config.visible),
            tile_size: Some(i64::from(config.tile_size)),
        }
    }
}

/// Address of a single tile within an overlay's quad-tree tiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub x: u32,
    pub y: u32,
    pub zoom: u32,
}

impl TileCoordinate {
    pub fn new(x: u32, y: u32, zoom: u32) -> Self {
        Self { x, y, zoom }
    }
}

/// Answer of the tile producer for one coordinate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TileResult {
    /// Raw, undecoded image bytes
    Present(Bytes),
    /// No tile exists at this coordinate
    #[default]
    Absent,
}

/// Tile image handed to the rendering surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub data: Bytes,
    pub tile_size: u32,
}

/// Result of a provider fetch as seen by the rendering surface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProvidedTile {
    Tile(Tile),
    /// Draw nothing for this cell and do not retry
    #[default]
    NoTile,
}

impl ProvidedTile {
    pub fn is_tile(&self) -> bool {
        matches!(self, ProvidedTile::Tile(_))
    }

    /// Approximate in-memory weight, used by the surface tile cache
    pub fn weight(&self) -> usize {
        match self {
            ProvidedTile::Tile(tile) => tile.data.len(),
            ProvidedTile::NoTile => 0,
        }
    }
}

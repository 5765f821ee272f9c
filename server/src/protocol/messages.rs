use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::overlay::{
    OverlayError, OverlayId, OverlayOptions, ProducerRequest, ProducerTile, Rejection,
};

/// Host to Server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Batched overlay changes, applied as add, then change, then remove
    UpdateTileOverlays {
        #[serde(default)]
        tile_overlays_to_add: Vec<WireDescriptor>,
        #[serde(default)]
        tile_overlays_to_change: Vec<WireDescriptor>,
        #[serde(default)]
        tile_overlay_ids_to_remove: Vec<OverlayId>,
        seq: u64,
    },
    /// Drop the cached tiles of one overlay
    ClearTileCache { tile_overlay_id: OverlayId, seq: u64 },
    /// Answer to a `get_tile` request; a missing tile means "no tile here"
    TileResponse {
        request_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tile: Option<ProducerTile>,
    },
    /// Ping for keepalive
    Ping { seq: u64 },
}

/// One overlay descriptor of a batch as received.
///
/// An entry that does not decode is kept as raw JSON so it can be refused on
/// its own while the rest of the batch goes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireDescriptor {
    Options(OverlayOptions),
    Malformed(serde_json::Value),
}

impl WireDescriptor {
    pub fn into_options(self) -> Result<OverlayOptions, Rejection> {
        match self {
            WireDescriptor::Options(options) => Ok(options),
            WireDescriptor::Malformed(value) => {
                let overlay_id = value
                    .get("tile_overlay_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let reason = match serde_json::from_value::<OverlayOptions>(value) {
                    Err(e) => e.to_string(),
                    Ok(_) => "descriptor could not be decoded".to_string(),
                };
                Err(Rejection {
                    overlay_id,
                    error: OverlayError::InvalidConfigValue {
                        field: "descriptor",
                        reason,
                    },
                })
            }
        }
    }
}

impl From<OverlayOptions> for WireDescriptor {
    fn from(options: OverlayOptions) -> Self {
        WireDescriptor::Options(options)
    }
}

/// Server to Host messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledgment of a host command
    Ack {
        ack_seq: u64,
        status: AckStatus,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        errors: Vec<CommandError>,
    },
    /// Ask the host for one tile
    GetTile {
        request_id: Uuid,
        tile_overlay_id: OverlayId,
        x: u32,
        y: u32,
        zoom: u32,
    },
    /// Message-level error
    Error { code: ErrorCode, message: String },
    /// Ping for keepalive (server to host)
    Ping,
    /// Pong response (to host's Ping)
    Pong,
}

/// `Rejected` means at least one entry of the command was refused; the other
/// entries were still applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidMessage,
    UnsupportedMessage,
}

/// One refused entry of a batch command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandError {
    pub tile_overlay_id: OverlayId,
    pub code: String,
    pub message: String,
}

impl From<Rejection> for CommandError {
    fn from(rejection: Rejection) -> Self {
        Self {
            code: rejection.error.code().to_string(),
            message: rejection.error.to_string(),
            tile_overlay_id: rejection.overlay_id,
        }
    }
}

impl ServerMessage {
    /// Ack for a command, `Rejected` if anything was refused
    pub fn ack(seq: u64, errors: Vec<CommandError>) -> Self {
        let status = if errors.is_empty() {
            AckStatus::Ok
        } else {
            AckStatus::Rejected
        };
        ServerMessage::Ack {
            ack_seq: seq,
            status,
            errors,
        }
    }

    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Ack { .. } => "ack",
            ServerMessage::GetTile { .. } => "get_tile",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Ping => "ping",
            ServerMessage::Pong => "pong",
        }
    }
}

impl From<ProducerRequest> for ServerMessage {
    fn from(request: ProducerRequest) -> Self {
        ServerMessage::GetTile {
            request_id: request.request_id,
            tile_overlay_id: request.overlay_id,
            x: request.coordinate.x,
            y: request.coordinate.y,
            zoom: request.coordinate.zoom,
        }
    }
}

impl HostMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            HostMessage::UpdateTileOverlays { .. } => "update_tile_overlays",
            HostMessage::ClearTileCache { .. } => "clear_tile_cache",
            HostMessage::TileResponse { .. } => "tile_response",
            HostMessage::Ping { .. } => "ping",
        }
    }
}

//! HTTP route handlers for the rendering surface

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;

use super::{LayerSnapshot, TileSurface};
use crate::overlay::{OverlayError, ProvidedTile, TileCoordinate};

/// Application state containing the rendering surface
#[derive(Clone)]
pub struct SurfaceAppState {
    pub surface: Arc<TileSurface>,
}

/// Error response for surface API
#[derive(Debug, Serialize)]
pub struct SurfaceErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<OverlayError> for SurfaceErrorResponse {
    fn from(e: OverlayError) -> Self {
        Self {
            code: e.code().to_string(),
            error: e.to_string(),
        }
    }
}

impl IntoResponse for SurfaceErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "unknown_overlay_id" => StatusCode::NOT_FOUND,
            "invalid_config_value" | "missing_field" => StatusCode::BAD_REQUEST,
            "duplicate_overlay_id" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// GET /api/overlays - Visible overlays in draw order
pub async fn list_overlays(State(state): State<SurfaceAppState>) -> Json<Vec<LayerSnapshot>> {
    Json(state.surface.draw_order())
}

/// GET /api/tiles/:overlay_id/:zoom/:x/:y - Get one overlay tile
///
/// Responds 200 with the raw tile bytes, or 204 when there is no tile at
/// this coordinate.
pub async fn get_tile(
    State(state): State<SurfaceAppState>,
    Path((overlay_id, zoom, x, y)): Path<(String, u32, u32, u32)>,
) -> Result<Response, SurfaceErrorResponse> {
    let coordinate = TileCoordinate::new(x, y, zoom);

    let tile = state
        .surface
        .request_tile(&overlay_id, coordinate)
        .await
        .map_err(|e| {
            tracing::debug!(
                "Tile requested for unknown overlay: {} zoom={} x={} y={}",
                overlay_id,
                zoom,
                x,
                y
            );
            SurfaceErrorResponse::from(e)
        })?;

    match tile {
        ProvidedTile::Tile(tile) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (header::CACHE_CONTROL, "no-cache".to_string()),
                (
                    header::HeaderName::from_static("x-tile-size"),
                    tile.tile_size.to_string(),
                ),
            ],
            tile.data,
        )
            .into_response()),
        ProvidedTile::NoTile => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Build surface API routes
pub fn surface_routes(state: SurfaceAppState) -> Router {
    Router::new()
        .route("/overlays", get(list_overlays))
        .route("/tiles/:overlay_id/:zoom/:x/:y", get(get_tile))
        .with_state(state)
}

//! Test Utilities Module
//!
//! Provides helper functions, fixtures, and mock capabilities for testing the
//! tile overlay bridge. This module is only compiled when running tests.

use crate::overlay::{
    OverlayConfig, OverlayId, OverlayOptions, ProducerTile, TileCoordinate, TileFetch,
    TileProvider, TileRequestChannel, TileResult,
};
use crate::protocol::{AckStatus, HostMessage, ServerMessage, WireDescriptor};
use crate::server::AppState;
use crate::surface::{RenderSurface, SurfaceAppState, surface_routes};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;
use uuid::Uuid;

// ============================================================================
// Test Context
// ============================================================================

/// Test context that holds all test fixtures and state
pub struct TestContext {
    pub app_state: AppState,
    pub router: Router,
}

impl TestContext {
    /// Create a new test context with default state
    pub fn new() -> Self {
        let app_state = AppState::new();
        let router = create_test_router(app_state.clone());
        Self { app_state, router }
    }

    /// Apply an overlay batch the way the WebSocket handler does
    pub async fn add_overlays(&self, descriptors: Vec<OverlayOptions>) {
        let rejections = self.app_state.registry.lock().await.add_overlays(descriptors);
        assert!(rejections.is_empty(), "unexpected rejections: {:?}", rejections);
    }

    /// Make an HTTP request to the test router
    pub async fn request(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request")
    }

    /// Make a GET request and parse JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, uri: &str) -> (StatusCode, Option<T>) {
        let (status, body) = self.get_bytes(uri).await;
        let json: Option<T> = serde_json::from_slice(&body).ok();
        (status, json)
    }

    /// Make a GET request and return the raw body
    pub async fn get_bytes(&self, uri: &str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");

        let response = self.request(request).await;
        let status = response.status();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        (status, body)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Test Router Setup
// ============================================================================

/// Create a test router with the surface routes configured
fn create_test_router(app_state: AppState) -> Router {
    use axum::routing::get;
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let surface_api = surface_routes(SurfaceAppState {
        surface: app_state.surface.clone(),
    });

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", surface_api)
        .layer(cors)
}

/// Health check handler for tests
async fn health_handler() -> &'static str {
    "ok"
}

// ============================================================================
// Mock Capabilities
// ============================================================================

/// In-memory tile producer keyed by (overlay, coordinate).
///
/// Unknown coordinates answer `Absent`. Every fetch is recorded.
#[derive(Default)]
pub struct StaticTileChannel {
    tiles: Mutex<HashMap<(OverlayId, TileCoordinate), Vec<u8>>>,
    requests: Mutex<Vec<(OverlayId, TileCoordinate)>>,
    delay: Option<Duration>,
    silent: bool,
}

impl StaticTileChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A producer that never answers
    pub fn never_responding() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// A producer that answers after `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn put(&self, overlay_id: &str, coordinate: TileCoordinate, data: Vec<u8>) {
        self.tiles
            .lock()
            .unwrap()
            .insert((overlay_id.to_string(), coordinate), data);
    }

    pub fn requests(&self) -> Vec<(OverlayId, TileCoordinate)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl TileRequestChannel for StaticTileChannel {
    fn fetch(&self, overlay_id: &OverlayId, coordinate: TileCoordinate) -> TileFetch {
        self.requests
            .lock()
            .unwrap()
            .push((overlay_id.clone(), coordinate));

        if self.silent {
            return TileFetch::spawn(std::future::pending());
        }

        let result = match self
            .tiles
            .lock()
            .unwrap()
            .get(&(overlay_id.clone(), coordinate))
        {
            Some(data) => TileResult::Present(Bytes::from(data.clone())),
            None => TileResult::Absent,
        };

        match self.delay {
            Some(delay) => TileFetch::spawn(async move {
                tokio::time::sleep(delay).await;
                result
            }),
            None => TileFetch::ready(result),
        }
    }
}

/// Rendering surface call as seen by `RecordingSurface`
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Attach(OverlayId),
    ApplyConfig(OverlayId),
    Detach(OverlayId),
    ClearTileCache(OverlayId),
}

/// Rendering surface that records every call it receives
#[derive(Default)]
pub struct RecordingSurface {
    calls: Mutex<Vec<SurfaceCall>>,
    attached: Mutex<HashMap<OverlayId, OverlayConfig>>,
}

impl RecordingSurface {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Configuration last applied to an attached overlay
    pub fn applied(&self, overlay_id: &str) -> Option<OverlayConfig> {
        self.attached.lock().unwrap().get(overlay_id).cloned()
    }

    pub fn attached_ids(&self) -> Vec<OverlayId> {
        let mut ids: Vec<OverlayId> = self.attached.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl RenderSurface for RecordingSurface {
    fn attach(&self, provider: Arc<TileProvider>, config: &OverlayConfig) {
        let overlay_id = provider.overlay_id().clone();
        self.attached
            .lock()
            .unwrap()
            .insert(overlay_id.clone(), config.clone());
        self.calls.lock().unwrap().push(SurfaceCall::Attach(overlay_id));
    }

    fn apply_config(&self, overlay_id: &OverlayId, config: &OverlayConfig) {
        self.attached
            .lock()
            .unwrap()
            .insert(overlay_id.clone(), config.clone());
        self.calls
            .lock()
            .unwrap()
            .push(SurfaceCall::ApplyConfig(overlay_id.clone()));
    }

    fn detach(&self, overlay_id: &OverlayId) {
        self.attached.lock().unwrap().remove(overlay_id);
        self.calls
            .lock()
            .unwrap()
            .push(SurfaceCall::Detach(overlay_id.clone()));
    }

    fn clear_tile_cache(&self, overlay_id: &OverlayId) {
        self.calls
            .lock()
            .unwrap()
            .push(SurfaceCall::ClearTileCache(overlay_id.clone()));
    }
}

// ============================================================================
// Mock Data Factories
// ============================================================================

/// Default overlay configuration: fade-in, opaque, z-index 0, visible, 256px
pub fn test_config() -> OverlayConfig {
    OverlayConfig::default()
}

/// Complete add descriptor for `overlay_id`
pub fn test_overlay_options(overlay_id: &str) -> OverlayOptions {
    OverlayOptions::from_config(overlay_id, &test_config())
}

/// Create an UpdateTileOverlays host message
pub fn update_message(
    add: Vec<OverlayOptions>,
    change: Vec<OverlayOptions>,
    remove: Vec<&str>,
    seq: u64,
) -> HostMessage {
    HostMessage::UpdateTileOverlays {
        tile_overlays_to_add: add.into_iter().map(WireDescriptor::from).collect(),
        tile_overlays_to_change: change.into_iter().map(WireDescriptor::from).collect(),
        tile_overlay_ids_to_remove: remove.into_iter().map(str::to_string).collect(),
        seq,
    }
}

/// Create a ClearTileCache host message
pub fn clear_cache_message(overlay_id: &str, seq: u64) -> HostMessage {
    HostMessage::ClearTileCache {
        tile_overlay_id: overlay_id.to_string(),
        seq,
    }
}

/// Create a TileResponse host message carrying a square tile
pub fn tile_response_message(request_id: Uuid, data: Option<Vec<u8>>) -> HostMessage {
    HostMessage::TileResponse {
        request_id,
        tile: Some(ProducerTile {
            width: 256,
            height: 256,
            data,
        }),
    }
}

/// Create a Ping host message
pub fn ping_message(seq: u64) -> HostMessage {
    HostMessage::Ping { seq }
}

// ============================================================================
// WebSocket Test Helpers
// ============================================================================

/// Expected response matcher
pub enum ExpectedResponse {
    /// Expect an Ack with specific status
    Ack { seq: u64, ok: bool },
    /// Expect a GetTile for an overlay
    GetTile { overlay_id: String },
    /// Expect a Pong message
    Pong,
    /// Custom matcher
    Custom(Box<dyn Fn(&ServerMessage) -> bool + Send + Sync>),
}

impl ExpectedResponse {
    /// Check if a server message matches this expected response
    pub fn matches(&self, msg: &ServerMessage) -> bool {
        match self {
            ExpectedResponse::Ack { seq, ok } => {
                matches!(
                    msg,
                    ServerMessage::Ack {
                        ack_seq,
                        status,
                        ..
                    } if *ack_seq == *seq && (*ok == (*status == AckStatus::Ok))
                )
            }
            ExpectedResponse::GetTile { overlay_id } => {
                matches!(
                    msg,
                    ServerMessage::GetTile { tile_overlay_id, .. } if tile_overlay_id == overlay_id
                )
            }
            ExpectedResponse::Pong => matches!(msg, ServerMessage::Pong),
            ExpectedResponse::Custom(matcher) => matcher(msg),
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Initialize test logging with detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tile_overlay_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

// ============================================================================
// Tests for Test Utilities
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayError;
    use crate::protocol::CommandError;

    #[tokio::test]
    async fn test_context_creation() {
        let ctx = TestContext::new();
        let (overlays, connections) = ctx.app_state.get_stats().await;
        assert_eq!(overlays, 0);
        assert_eq!(connections, 0);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let ctx = TestContext::new();
        let (status, body) = ctx.get_bytes("/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_overlay_listing_follows_registry() {
        init_test_logging();
        let ctx = TestContext::new();
        ctx.add_overlays(vec![test_overlay_options("ov1")]).await;

        let (status, layers) = ctx.get_json::<Vec<serde_json::Value>>("/api/overlays").await;

        assert_eq!(status, StatusCode::OK);
        let layers = layers.unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0]["overlay_id"], "ov1");
        assert_eq!(layers[0]["tile_size"], 256);
    }

    #[tokio::test]
    async fn test_tile_route_without_producer_is_no_content() {
        let ctx = TestContext::new();
        ctx.add_overlays(vec![test_overlay_options("ov1")]).await;

        let (status, body) = ctx.get_bytes("/api/tiles/ov1/4/2/3").await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_tile_route_for_unknown_overlay_is_not_found() {
        let ctx = TestContext::new();

        let (status, body) = ctx
            .get_json::<serde_json::Value>("/api/tiles/ghost/0/0/0")
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.unwrap()["code"], "unknown_overlay_id");
    }

    #[tokio::test]
    async fn test_static_channel_answers() {
        let channel = StaticTileChannel::new();
        channel.put("ov1", TileCoordinate::new(0, 0, 0), vec![1, 2]);
        let id = "ov1".to_string();

        assert_eq!(
            channel.fetch(&id, TileCoordinate::new(0, 0, 0)).await,
            TileResult::Present(Bytes::from_static(&[1, 2]))
        );
        assert_eq!(
            channel.fetch(&id, TileCoordinate::new(1, 0, 0)).await,
            TileResult::Absent
        );
        assert_eq!(channel.request_count(), 2);
    }

    #[test]
    fn test_recording_surface_tracks_attached_overlays() {
        let surface = RecordingSurface::default();
        let provider = Arc::new(TileProvider::new(
            "ov1".to_string(),
            256,
            Arc::new(StaticTileChannel::new()),
            None,
        ));

        surface.attach(provider, &test_config());
        assert_eq!(surface.attached_ids(), vec!["ov1".to_string()]);

        surface.detach(&"ov1".to_string());
        assert!(surface.attached_ids().is_empty());
        assert_eq!(
            surface.calls(),
            vec![
                SurfaceCall::Attach("ov1".to_string()),
                SurfaceCall::Detach("ov1".to_string()),
            ]
        );
    }

    #[test]
    fn test_expected_response_matching() {
        let ack_ok = ServerMessage::ack(1, Vec::new());
        let ack_rejected = ServerMessage::ack(
            1,
            vec![CommandError {
                tile_overlay_id: "ov1".to_string(),
                code: OverlayError::UnknownOverlayId("ov1".to_string())
                    .code()
                    .to_string(),
                message: "test".to_string(),
            }],
        );

        assert!(ExpectedResponse::Ack { seq: 1, ok: true }.matches(&ack_ok));
        assert!(!ExpectedResponse::Ack { seq: 1, ok: true }.matches(&ack_rejected));
        assert!(ExpectedResponse::Ack { seq: 1, ok: false }.matches(&ack_rejected));
        assert!(ExpectedResponse::Pong.matches(&ServerMessage::Pong));
        assert!(
            ExpectedResponse::GetTile {
                overlay_id: "ov1".to_string()
            }
            .matches(&ServerMessage::GetTile {
                request_id: Uuid::new_v4(),
                tile_overlay_id: "ov1".to_string(),
                x: 0,
                y: 0,
                zoom: 0,
            })
        );
    }

    #[test]
    fn test_message_factories() {
        let message = update_message(vec![test_overlay_options("a")], Vec::new(), vec!["b"], 3);
        assert_eq!(message.message_type(), "update_tile_overlays");
        assert_eq!(clear_cache_message("a", 4).message_type(), "clear_tile_cache");
        assert_eq!(
            tile_response_message(Uuid::new_v4(), None).message_type(),
            "tile_response"
        );
        assert_eq!(ping_message(5).message_type(), "ping");
    }
}

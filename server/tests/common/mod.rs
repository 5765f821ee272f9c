//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use axum::{Json, Router, routing::get};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tile_overlay_bridge::overlay::OverlayOptions;
use tile_overlay_bridge::protocol::{HostMessage, ServerMessage};
use tile_overlay_bridge::server::{AppState, ws_handler};
use tile_overlay_bridge::surface::{SurfaceAppState, surface_routes};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tower_http::cors::{Any, CorsLayer};

/// WebSocket stream of a test host
pub type HostSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a test application router with state
pub fn create_test_app_with_state() -> (Router, AppState) {
    let app_state = AppState::new();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let surface_api = surface_routes(SurfaceAppState {
        surface: app_state.surface.clone(),
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(app_state.clone())
        .merge(Router::new().nest("/api", surface_api))
        .layer(cors);

    (app, app_state)
}

/// Create a test application router with all routes configured
pub fn create_test_app() -> Router {
    create_test_app_with_state().0
}

/// Start a test server on a random port
pub async fn start_test_server() -> (SocketAddr, AppState, tokio::task::JoinHandle<()>) {
    let (app, state) = create_test_app_with_state();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state, handle)
}

/// Connect a host (and tile producer) to the test server
pub async fn connect_host(addr: SocketAddr) -> HostSocket {
    let (ws_stream, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    // Let the server install the producer before requests are made
    tokio::time::sleep(Duration::from_millis(50)).await;
    ws_stream
}

/// Send one host message
pub async fn send_host_message(ws: &mut HostSocket, msg: &HostMessage) {
    let json = serde_json::to_string(msg).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

/// Wait for the first server message accepted by `matcher`, skipping others
pub async fn wait_for_message<F>(ws: &mut HostSocket, matcher: F) -> Option<ServerMessage>
where
    F: Fn(&ServerMessage) -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            if let Ok(Message::Text(text)) = msg
                && let Ok(server_msg) = serde_json::from_str::<ServerMessage>(&text)
                && matcher(&server_msg)
            {
                return Some(server_msg);
            }
        }
        None
    })
    .await;

    result.ok().flatten()
}

/// Complete add descriptor
pub fn overlay_options(id: &str, transparency: f32, z_index: i32) -> OverlayOptions {
    OverlayOptions {
        tile_overlay_id: id.to_string(),
        fade_in: Some(true),
        transparency: Some(transparency),
        z_index: Some(z_index),
        visible: Some(true),
        tile_size: Some(256),
    }
}

/// Initialize test logging for detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tile_overlay_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

use crate::config::Config;
use crate::overlay::{OverlayOptions, OverlayRegistry, ProducerChannel, Rejection};
use crate::protocol::{CommandError, ErrorCode, HostMessage, ServerMessage, WireDescriptor};
use crate::surface::TileSurface;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection state for a single host
pub struct Connection {
    pub id: Uuid,
    /// Id under which this host answers tile requests
    pub producer_id: Uuid,
    pub last_ping: Instant,
    pub sender: mpsc::Sender<ServerMessage>,
}

/// Global connection registry
pub type ConnectionRegistry = Arc<RwLock<HashMap<Uuid, Connection>>>;

/// Configuration for WebSocket connections
#[derive(Debug, Clone, Copy)]
pub struct WsConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub outgoing_queue_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            outgoing_queue_size: 64,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub connections: ConnectionRegistry,
    /// Host batches are applied one at a time
    pub registry: Arc<Mutex<OverlayRegistry>>,
    pub channel: ProducerChannel,
    pub surface: Arc<TileSurface>,
    pub ws_config: WsConfig,
}

impl AppState {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Wire the channel, surface and registry from the server configuration
    pub fn from_config(config: &Config) -> Self {
        let channel = ProducerChannel::new(config.tiles.producer_queue_size);
        let surface = Arc::new(TileSurface::new(config.cache.clone()));
        let registry = OverlayRegistry::new(Arc::new(channel.clone()), surface.clone())
            .with_fetch_timeout(config.tiles.fetch_timeout);

        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            registry: Arc::new(Mutex::new(registry)),
            channel,
            surface,
            ws_config: WsConfig {
                ping_interval: config.ws.ping_interval,
                ping_timeout: config.ws.ping_timeout,
                ..WsConfig::default()
            },
        }
    }

    pub fn with_ws_config(mut self, ws_config: WsConfig) -> Self {
        self.ws_config = ws_config;
        self
    }

    /// Get (registered overlays, open connections)
    pub async fn get_stats(&self) -> (usize, usize) {
        let overlays = self.registry.lock().await.len();
        let connections = self.connections.read().await.len();
        (overlays, connections)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!("New WebSocket connection: {}", connection_id);
    counter!("tile_overlay_ws_connections_total").increment(1);

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.ws_config.outgoing_queue_size);

    // The connected host answers tile requests
    let (producer_id, mut requests) = state.channel.connect_producer().await;

    // Register connection
    {
        let mut connections = state.connections.write().await;
        connections.insert(
            connection_id,
            Connection {
                id: connection_id,
                producer_id,
                last_ping: Instant::now(),
                sender: tx.clone(),
            },
        );
    }

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Spawn task to forward outgoing messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    counter!("tile_overlay_ws_messages_sent_total", "type" => msg.message_type())
                        .increment(1);
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
    });

    // Spawn task forwarding tile requests to the host
    let request_tx = tx.clone();
    let request_task = tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            debug!(
                "Requesting tile {} of {} from producer",
                request.request_id, request.overlay_id
            );
            if request_tx.send(ServerMessage::from(request)).await.is_err() {
                break;
            }
        }
    });

    // Spawn ping task
    let ping_tx = tx.clone();
    let ping_state = state.clone();
    let ping_connection_id = connection_id;
    let mut ping_task = tokio::spawn(async move {
        let config = ping_state.ws_config;
        let mut interval = tokio::time::interval(config.ping_interval);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            // Check if connection is still alive
            let should_close = {
                let connections = ping_state.connections.read().await;
                if let Some(conn) = connections.get(&ping_connection_id) {
                    conn.last_ping.elapsed() > config.ping_timeout + config.ping_interval
                } else {
                    true
                }
            };

            if should_close {
                debug!("Connection {} timed out", ping_connection_id);
                break;
            }

            // Host should answer with a ping of its own
            if ping_tx.send(ServerMessage::Ping).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    loop {
        let result = tokio::select! {
            next = ws_receiver.next() => match next {
                Some(result) => result,
                None => break,
            },
            // The ping task only ends once the host went quiet
            _ = &mut ping_task => {
                info!("Closing idle connection {}", connection_id);
                break;
            }
        };

        match result {
            Ok(msg) => match msg {
                Message::Text(text) => {
                    touch(&state, connection_id).await;

                    // Parse and handle message
                    match serde_json::from_str::<HostMessage>(&text) {
                        Ok(host_msg) => {
                            handle_host_message(host_msg, connection_id, &state, &tx).await;
                        }
                        Err(e) => {
                            warn!("Failed to parse host message: {}", e);
                            let _ = tx
                                .send(ServerMessage::Error {
                                    code: ErrorCode::InvalidMessage,
                                    message: format!("Invalid message format: {}", e),
                                })
                                .await;
                        }
                    }
                }
                Message::Binary(_) => {
                    debug!("Received binary message");
                    let _ = tx
                        .send(ServerMessage::Error {
                            code: ErrorCode::UnsupportedMessage,
                            message: "Binary messages are not supported".to_string(),
                        })
                        .await;
                }
                Message::Ping(data) => {
                    // Handled by axum automatically with pong
                    debug!("Received ping: {:?}", data);
                }
                Message::Pong(_) => {
                    touch(&state, connection_id).await;
                }
                Message::Close(_) => {
                    info!("Host {} requested close", connection_id);
                    break;
                }
            },
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        }
    }

    // Cleanup
    ping_task.abort();
    request_task.abort();
    send_task.abort();

    // Unanswered tile requests of this host resolve as absent
    state.channel.disconnect_producer(producer_id).await;

    // Remove from registry
    {
        let mut connections = state.connections.write().await;
        connections.remove(&connection_id);
    }

    info!("WebSocket connection closed: {}", connection_id);
}

/// Update last ping time
async fn touch(state: &AppState, connection_id: Uuid) {
    let mut connections = state.connections.write().await;
    if let Some(conn) = connections.get_mut(&connection_id) {
        conn.last_ping = Instant::now();
    }
}

/// Handle a parsed host message
async fn handle_host_message(
    msg: HostMessage,
    connection_id: Uuid,
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
) {
    counter!("tile_overlay_ws_messages_received_total", "type" => msg.message_type())
        .increment(1);

    match msg {
        HostMessage::Ping { seq } => {
            let _ = tx.send(ServerMessage::Pong).await;
            let _ = tx.send(ServerMessage::ack(seq, Vec::new())).await;
        }
        HostMessage::UpdateTileOverlays {
            tile_overlays_to_add,
            tile_overlays_to_change,
            tile_overlay_ids_to_remove,
            seq,
        } => {
            debug!(
                "Overlay batch from {}: add={}, change={}, remove={}",
                connection_id,
                tile_overlays_to_add.len(),
                tile_overlays_to_change.len(),
                tile_overlay_ids_to_remove.len()
            );

            let mut rejections = Vec::new();
            let to_add = accept_descriptors(tile_overlays_to_add, &mut rejections);
            let to_change = accept_descriptors(tile_overlays_to_change, &mut rejections);
            {
                let mut registry = state.registry.lock().await;
                rejections.extend(registry.add_overlays(to_add));
                rejections.extend(registry.change_overlays(to_change));
                registry.remove_overlay_ids(tile_overlay_ids_to_remove);
            }

            let errors: Vec<CommandError> =
                rejections.into_iter().map(CommandError::from).collect();
            let _ = tx.send(ServerMessage::ack(seq, errors)).await;
        }
        HostMessage::ClearTileCache {
            tile_overlay_id,
            seq,
        } => {
            state.registry.lock().await.clear_tile_cache(&tile_overlay_id);
            let _ = tx.send(ServerMessage::ack(seq, Vec::new())).await;
        }
        HostMessage::TileResponse { request_id, tile } => {
            if !state.channel.complete(request_id, tile) {
                debug!(
                    "Tile response {} from {} arrived after its requester gave up",
                    request_id, connection_id
                );
            }
        }
    }
}

/// Keep the descriptors that decoded, refusing the others one by one
fn accept_descriptors(
    descriptors: Vec<WireDescriptor>,
    rejections: &mut Vec<Rejection>,
) -> Vec<OverlayOptions> {
    let mut accepted = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        match descriptor.into_options() {
            Ok(options) => accepted.push(options),
            Err(rejection) => {
                warn!(
                    "Rejected malformed overlay descriptor for '{}': {}",
                    rejection.overlay_id, rejection.error
                );
                counter!("tile_overlay_commands_rejected_total", "op" => "decode").increment(1);
                rejections.push(rejection);
            }
        }
    }
    accepted
}

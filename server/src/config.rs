//! Server configuration
//!
//! Configuration is loaded from environment variables, falling back to the
//! defaults below.

use std::env;
use std::time::Duration;

use crate::overlay::DEFAULT_PRODUCER_QUEUE_SIZE;
use crate::surface::TileCacheConfig;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Tile fetching configuration
    pub tiles: TileConfig,

    /// Surface tile cache configuration
    pub cache: TileCacheConfig,

    /// WebSocket keepalive configuration
    pub ws: WsSettings,
}

/// Tile fetching configuration
#[derive(Debug, Clone)]
pub struct TileConfig {
    /// Give up on a producer answer after this long (None waits forever)
    pub fetch_timeout: Option<Duration>,
    /// Capacity of the queue of requests waiting to be sent to the producer
    pub producer_queue_size: usize,
}

/// WebSocket keepalive configuration
#[derive(Debug, Clone)]
pub struct WsSettings {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tiles: TileConfig::default(),
            cache: TileCacheConfig::default(),
            ws: WsSettings::default(),
        }
    }
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Some(Duration::from_secs(10)),
            producer_queue_size: DEFAULT_PRODUCER_QUEUE_SIZE,
        }
    }
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Tile config
        if let Ok(val) = env::var("TILE_FETCH_TIMEOUT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            // 0 disables the timeout
            config.tiles.fetch_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Ok(val) = env::var("PRODUCER_QUEUE_SIZE")
            && let Ok(size) = val.parse::<usize>()
            && size > 0
        {
            config.tiles.producer_queue_size = size;
        }

        // Cache config
        if let Ok(val) = env::var("TILE_CACHE_MAX_MB")
            && let Ok(mb) = val.parse::<u64>()
        {
            config.cache.max_size_bytes = mb * 1024 * 1024;
        }
        if let Ok(val) = env::var("TILE_CACHE_TTL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.cache.ttl = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("TILE_CACHE_TTI_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.cache.tti = Duration::from_secs(secs);
        }

        // WebSocket config
        if let Ok(val) = env::var("WS_PING_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
            && secs > 0
        {
            config.ws.ping_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("WS_PING_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.ws.ping_timeout = Duration::from_secs(secs);
        }

        config
    }
}

//! Application State
//!
//! Shared state accessible by all handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::history::HistoryService;
use crate::storage::ReadingStore;
use crate::websocket::{ConnectionRegistry, RegistryConfig, Relay, RelayConfig};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Relay core driving every WebSocket connection
    pub relay: Arc<Relay>,
    /// Connection registry shared with the relay
    pub registry: Arc<ConnectionRegistry>,
    /// Reading store the relay persists into
    pub store: Arc<dyn ReadingStore>,
    /// History queries over the same store
    pub history: HistoryService,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Wire registry, relay and history service around `store`
    pub fn new(store: Arc<dyn ReadingStore>, config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig {
            max_connections: config.max_connections,
        }));
        let relay = Arc::new(Relay::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            RelayConfig {
                notify_device_online: config.notify_device_online,
            },
        ));

        Self {
            relay,
            registry,
            history: HistoryService::new(Arc::clone(&store)),
            store,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

//! # Fieldrelay
//!
//! Real-time telemetry relay between field irrigation controllers and the
//! dashboards watching them.
//!
//! Controllers ("devices") and dashboards ("consumers") connect to one
//! WebSocket endpoint and announce their role. Device telemetry fans out to
//! every consumer and is persisted in the background; consumer commands fan
//! out to every device.
//!
//! ## Modules
//!
//! - [`websocket`]: Connection registry, relay core and socket handling
//! - [`telemetry`]: Reading and command types, display calibration
//! - [`storage`]: Reading store adapter (SQLite or in-memory)
//! - [`history`]: Hourly and daily averages over stored readings
//! - [`session`]: Reconnecting client session for devices and dashboards
//! - [`api`]: HTTP router and server
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fieldrelay::api::{serve, AppState};
//! use fieldrelay::config::Config;
//! use fieldrelay::storage::open_store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let store = open_store(&config.storage)?;
//!
//!     let state = AppState::new(store, config.server.clone());
//!     serve(state, &config.server).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod history;
pub mod logging;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig, ServerConfig, SessionConfig, StorageConfig};

pub use history::{HistoryPoint, HistoryService, HistoryWindow};

pub use session::{
    DashboardState, LinkState, ReconnectingSession, RollingHistory, SessionError, SessionOptions,
    SessionRole,
};

pub use storage::{
    open_store, MemoryReadingStore, ReadingStore, SqliteReadingStore, StorageError, StorageResult,
    StoredReading, TimeRange,
};

pub use telemetry::{CommandKind, ControlCommand, Reading, Switch, TelemetryFrame};

pub use websocket::{
    ConnectionRegistry, ControlFrame, Dispatch, InboundMessage, Relay, RegistryError, Role,
};

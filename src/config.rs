//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty means permissive
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Send `device-status` to consumers when a device announces itself
    #[serde(default = "default_notify_device_online")]
    pub notify_device_online: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_max_connections() -> usize {
    1000
}

fn default_notify_device_online() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            max_connections: default_max_connections(),
            notify_device_online: default_notify_device_online(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reading store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `sqlite` or `memory`
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("fieldrelay").join("readings.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./fieldrelay_data/readings.db".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
        }
    }
}

/// Client session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Relay WebSocket URL
    #[serde(default = "default_relay_url")]
    pub url: String,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Key a consumer announces itself under
    #[serde(default = "default_consumer_key")]
    pub consumer_key: String,
}

fn default_relay_url() -> String {
    "ws://localhost:3000".to_string()
}

fn default_reconnect_delay() -> u64 {
    3000 // 3 seconds
}

fn default_history_capacity() -> usize {
    100
}

fn default_consumer_key() -> String {
    "frontend-1234".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            reconnect_delay_ms: default_reconnect_delay(),
            history_capacity: default_history_capacity(),
            consumer_key: default_consumer_key(),
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("fieldrelay").join("config.toml")),
            Some(PathBuf::from("/etc/fieldrelay/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(host) = lookup("FIELDRELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("FIELDRELAY_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        // Storage overrides
        if let Some(backend) = lookup("FIELDRELAY_STORAGE_BACKEND") {
            self.storage.backend = backend;
        }
        if let Some(path) = lookup("FIELDRELAY_DB_PATH") {
            self.storage.db_path = path;
        }

        // Session overrides
        if let Some(url) = lookup("FIELDRELAY_RELAY_URL") {
            self.session.url = url;
        }

        // Logging overrides
        if let Some(level) = lookup("FIELDRELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("FIELDRELAY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Fieldrelay Configuration
#
# Environment variables override these settings:
# - FIELDRELAY_HOST
# - FIELDRELAY_PORT
# - FIELDRELAY_STORAGE_BACKEND
# - FIELDRELAY_DB_PATH
# - FIELDRELAY_RELAY_URL
# - FIELDRELAY_LOG_LEVEL
# - FIELDRELAY_LOG_FORMAT

[server]
# Relay host and port
host = "0.0.0.0"
port = 3000

# Allowed CORS origins (empty list allows any origin)
cors_origins = ["http://localhost:5173"]

# Maximum concurrently open sockets
max_connections = 1000

# Tell dashboards when a device announces itself
notify_device_online = true

[storage]
# Reading store backend: sqlite or memory
backend = "sqlite"

# SQLite database file
db_path = "./fieldrelay_data/readings.db"

[session]
# Relay URL used by fieldrelay-client
url = "ws://localhost:3000"

# Fixed delay between reconnection attempts (ms)
reconnect_delay_ms = 3000

# Readings kept in the client's rolling history
history_capacity = 100

# Key a consumer registers under
consumer_key = "frontend-1234"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

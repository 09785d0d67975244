//! # Client Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PULSE_URL=wss://realtime.example.com                               │
//! │     PULSE_OFFLINE_SUPPORT=false                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pulse/pulse.toml (Linux)                                 │
//! │     ~/Library/Application Support/dev.pulse.pulse/pulse.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! debug = false
//! offline_support = true
//! max_listeners = 100
//!
//! [connection]
//! url = "ws://localhost:3001"
//! path = "/socket"
//! transports = ["websocket", "polling"]
//! timeout_ms = 30000
//!
//! [reconnect]
//! auto_reconnect = true
//! interval_ms = 5000
//! max_attempts = 10
//!
//! [health]
//! ping_interval_ms = 5000
//! check_interval_ms = 30000
//!
//! [queue]
//! max_retries = 3
//!
//! [storage]
//! database_path = "/var/lib/pulse/pulse.db"
//! name = "pulse"
//! version = 1
//! ```

use std::path::PathBuf;
use std::time::Duration;

use pulse_core::schema::{default_collections, DEFAULT_DATABASE_NAME, SCHEMA_VERSION};
use pulse_core::{CollectionSchema, StorageSchema, DEFAULT_MAX_LISTENERS, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// Transports the client knows how to negotiate.
pub const KNOWN_TRANSPORTS: &[&str] = &["websocket", "polling"];

// =============================================================================
// Connection Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Server base URL (ws:// or wss://).
    pub url: String,

    /// Endpoint path appended to the URL.
    pub path: String,

    /// Transport preference, most preferred first.
    pub transports: Vec<String>,

    /// Deadline for connecting and for each acknowledged request.
    pub timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            url: "ws://localhost:3001".to_string(),
            path: "/socket".to_string(),
            transports: vec!["websocket".to_string(), "polling".to_string()],
            timeout_ms: 30_000,
        }
    }
}

// =============================================================================
// Reconnect Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub auto_reconnect: bool,

    /// Base delay; attempt `n` waits `interval * 2^n` plus jitter.
    pub interval_ms: u64,

    /// Retries after the first failure before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        ReconnectSettings {
            auto_reconnect: true,
            interval_ms: 5_000,
            max_attempts: 10,
        }
    }
}

// =============================================================================
// Health Settings
// =============================================================================

/// Liveness probing. A zero interval disables that probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub ping_interval_ms: u64,
    pub check_interval_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        HealthSettings {
            ping_interval_ms: 5_000,
            check_interval_ms: 30_000,
        }
    }
}

// =============================================================================
// Queue Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Replay attempts per queued operation before it is dropped.
    pub max_retries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite file. `None` uses the platform data directory, falling back
    /// to memory when no home directory exists.
    pub database_path: Option<PathBuf>,

    pub name: String,

    /// Bump to provision new collections or indexes on existing databases.
    pub version: u32,

    pub collections: Vec<CollectionSchema>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: None,
            name: DEFAULT_DATABASE_NAME.to_string(),
            version: SCHEMA_VERSION,
            collections: default_collections(),
        }
    }
}

// =============================================================================
// Main Client Configuration
// =============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Verbose logging (see [`crate::logging::init_tracing`]).
    pub debug: bool,

    /// Queue events while disconnected and replay them on reconnect.
    pub offline_support: bool,

    /// Listener cap per event name.
    pub max_listeners: usize,

    pub connection: ConnectionSettings,
    pub reconnect: ReconnectSettings,
    pub health: HealthSettings,
    pub queue: QueueSettings,
    pub storage: StorageSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            debug: false,
            offline_support: true,
            max_listeners: DEFAULT_MAX_LISTENERS,
            connection: ConnectionSettings::default(),
            reconnect: ReconnectSettings::default(),
            health: HealthSettings::default(),
            queue: QueueSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.connection.url = url.into();
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (pulse.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading client config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load client config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Client config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = Url::parse(&self.connection.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::Config(format!(
                "Server URL must start with ws:// or wss://, got: {}",
                self.connection.url
            )));
        }

        if !self.connection.path.starts_with('/') {
            return Err(SyncError::Config(format!(
                "path must start with '/', got: {}",
                self.connection.path
            )));
        }

        if self.connection.timeout_ms == 0 {
            return Err(SyncError::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }

        if self.connection.transports.is_empty() {
            return Err(SyncError::Config(
                "at least one transport is required".into(),
            ));
        }
        if let Some(unknown) = self
            .connection
            .transports
            .iter()
            .find(|t| !KNOWN_TRANSPORTS.contains(&t.as_str()))
        {
            return Err(SyncError::Config(format!(
                "Unknown transport: '{}'. Valid options: websocket, polling",
                unknown
            )));
        }

        if self.reconnect.interval_ms == 0 {
            return Err(SyncError::Config(
                "reconnect interval_ms must be greater than 0".into(),
            ));
        }

        if self.max_listeners == 0 {
            return Err(SyncError::Config(
                "max_listeners must be greater than 0".into(),
            ));
        }

        self.storage_schema()
            .validate()
            .map_err(|e| SyncError::Config(format!("storage schema: {}", e)))?;

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PULSE_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.connection.url = url;
        }

        if let Ok(path) = std::env::var("PULSE_PATH") {
            self.connection.path = path;
        }

        if let Ok(value) = std::env::var("PULSE_OFFLINE_SUPPORT") {
            match parse_flag(&value) {
                Some(enabled) => self.offline_support = enabled,
                None => warn!(value = %value, "Unrecognized PULSE_OFFLINE_SUPPORT value"),
            }
        }

        if let Ok(value) = std::env::var("PULSE_DEBUG") {
            match parse_flag(&value) {
                Some(enabled) => self.debug = enabled,
                None => warn!(value = %value, "Unrecognized PULSE_DEBUG value"),
            }
        }

        if let Ok(timeout) = std::env::var("PULSE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                debug!(timeout_ms = ms, "Overriding timeout from environment");
                self.connection.timeout_ms = ms;
            }
        }

        if let Ok(attempts) = std::env::var("PULSE_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                self.reconnect.max_attempts = n;
            }
        }

        if let Ok(path) = std::env::var("PULSE_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "pulse", "pulse")
            .map(|dirs| dirs.config_dir().join("pulse.toml"))
    }

    /// Returns the default database file path.
    pub fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "pulse", "pulse")
            .map(|dirs| dirs.data_dir().join("pulse.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Full endpoint: base URL with the configured path.
    pub fn endpoint(&self) -> SyncResult<Url> {
        let mut url = Url::parse(&self.connection.url)?;
        url.set_path(&self.connection.path);
        Ok(url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.connection.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect.interval_ms)
    }

    /// `None` when pinging is disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        non_zero_millis(self.health.ping_interval_ms)
    }

    /// `None` when health checks are disabled.
    pub fn health_check_interval(&self) -> Option<Duration> {
        non_zero_millis(self.health.check_interval_ms)
    }

    /// Schema handed to the storage layer.
    pub fn storage_schema(&self) -> StorageSchema {
        StorageSchema {
            name: self.storage.name.clone(),
            version: self.storage.version,
            collections: self.storage.collections.clone(),
        }
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

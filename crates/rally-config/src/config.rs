//! Configuration structs with sensible defaults and RON persistence.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name used inside the config directory.
const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration shared by the relay and game clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Session-layer settings used by game clients.
    pub network: NetworkConfig,
    /// Relay server settings.
    pub relay: RelayConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Session-layer configuration for a game client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Relay address (`host:port`) used to reach the other player.
    pub relay_address: String,
    /// Prefix for host endpoint addresses. The room code is appended.
    pub host_prefix: String,
    /// Prefix for joiner endpoint addresses.
    pub join_prefix: String,
    /// Request reliable delivery on both roles.
    pub reliable: bool,
    /// How long a joiner waits for the host to accept, in milliseconds (0 = forever).
    pub join_timeout_ms: u64,
    /// How long a host waits for a joiner, in milliseconds (0 = forever).
    pub host_timeout_ms: u64,
    /// Maximum number of undrained inbound messages (0 = unbounded).
    pub max_inbound: usize,
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the relay binds to.
    pub bind_address: String,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,
    /// How long a client waits for its registration to be confirmed, in milliseconds.
    pub register_timeout_ms: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Also write JSON logs to a file in debug builds.
    pub log_to_file: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            relay_address: "127.0.0.1:7878".to_string(),
            host_prefix: "rally-host-".to_string(),
            join_prefix: "rally-join-".to_string(),
            reliable: true,
            join_timeout_ms: 10_000,
            host_timeout_ms: 0,
            max_inbound: 1024,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7878".to_string(),
            max_connections: 256,
            max_frame_bytes: 1_048_576,
            register_timeout_ms: 5_000,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

// --- Persistence ---

impl Config {
    /// Platform config directory for Rally (e.g. `~/.config/rally`).
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("rally"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// if the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Wrote default settings to {}", path.display());
            return Ok(config);
        }

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Config = ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        log::info!("Using settings from {}", path.display());
        Ok(config)
    }

    /// Write `config.ron` into `config_dir`, creating the directory if needed.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let path = config_dir.join(CONFIG_FILE);
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::new().depth_limit(2))?;

        std::fs::create_dir_all(config_dir)
            .and_then(|()| std::fs::write(&path, text))
            .map_err(|source| ConfigError::Write { path, source })
    }

    /// Reject settings that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.network.host_prefix.is_empty() {
            return invalid("network.host_prefix", "must not be empty");
        }
        if self.network.host_prefix == self.network.join_prefix {
            return invalid("network.join_prefix", "must differ from host_prefix");
        }
        if self.relay.bind_address.parse::<SocketAddr>().is_err() {
            return invalid("relay.bind_address", "must be an ip:port socket address");
        }
        if self.relay.max_connections == 0 {
            return invalid("relay.max_connections", "must be at least 1");
        }
        if self.relay.max_frame_bytes == 0 {
            return invalid("relay.max_frame_bytes", "must be at least 1");
        }
        if self.relay.register_timeout_ms == 0 {
            return invalid("relay.register_timeout_ms", "must be at least 1");
        }
        Ok(())
    }
}

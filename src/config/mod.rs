//! Configuration module
//!
//! Handles loading and saving relay configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::dispatch::DEFAULT_DISPATCH_CAPACITY;
use crate::network::{NetworkConfig as RuntimeNetworkConfig, DEFAULT_WRITE_TIMEOUT_MS};
use crate::protocol::{DEFAULT_POOL_SIZE, DEFAULT_PORT, MAX_MESSAGE_SIZE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Pool settings
    #[serde(default)]
    pub pool: PoolConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log every inbound and outbound envelope
    #[serde(default)]
    pub debug: bool,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum envelope size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Units buffered between readers and the event processor
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
    /// Milliseconds a peer may take to accept one envelope
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_dispatch_capacity() -> usize {
    DEFAULT_DISPATCH_CAPACITY
}

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            max_message_size: default_max_message_size(),
            dispatch_capacity: default_dispatch_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Players needed before a round starts
    #[serde(default = "default_pool_size")]
    pub size: usize,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("shuffle-relay/config.toml")),
            Some(PathBuf::from("./shuffle-relay.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool.size == 0 {
            return Err(ConfigError::Invalid("pool.size must be at least 1".to_string()));
        }
        if self.network.dispatch_capacity == 0 {
            return Err(ConfigError::Invalid(
                "network.dispatch_capacity must be at least 1".to_string(),
            ));
        }
        if self.network.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "network.max_message_size must be at least 1".to_string(),
            ));
        }
        if self.network.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.write_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime network settings for the server
    pub fn network_config(&self) -> RuntimeNetworkConfig {
        RuntimeNetworkConfig {
            port: self.network.port,
            bind_address: self.network.bind_address.clone(),
            max_message_size: self.network.max_message_size,
            dispatch_capacity: self.network.dispatch_capacity,
            write_timeout_ms: self.network.write_timeout_ms,
            debug: self.general.debug,
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig { debug: false },
        network: NetworkConfig {
            port: 8080,
            ..Default::default()
        },
        pool: PoolConfig { size: 5 },
    };

    Ok(toml::to_string_pretty(&config)?)
}

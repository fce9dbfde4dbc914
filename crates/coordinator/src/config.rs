//! Coordinator configuration

use std::time::Duration;

use keeper::RemoteStoreConfig;
use serde::{Deserialize, Serialize};
use ts_core::DEFAULT_HASH_SPACE;

use crate::rebalancer::Thresholds;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    /// Coordination store connection
    #[serde(default)]
    pub keeper: RemoteStoreConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub shard_client: ShardClientConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.max_shards == 0 {
            return Err(ConfigError::Invalid("cluster.max_shards must be > 0".into()));
        }
        if self.cluster.hash_space == 0 {
            return Err(ConfigError::Invalid("cluster.hash_space must be > 0".into()));
        }
        if self.rebalance.interval_secs == 0 {
            return Err(ConfigError::Invalid("rebalance.interval_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Configured instance id, or a fresh random one
    pub fn instance_id(&self) -> String {
        if self.coordinator.instance_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.coordinator.instance_id.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Written into `/coordinator/leader` and migration locks; empty = random
    #[serde(default)]
    pub instance_id: String,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP API listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Shard slots mirrored by the catalog
    #[serde(default = "default_max_shards")]
    pub max_shards: u32,
    #[serde(default = "default_hash_space")]
    pub hash_space: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_shards: default_max_shards(),
            hash_space: default_hash_space(),
        }
    }
}

/// Hotspot rebalancer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    #[serde(default = "default_rebalance_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// The hottest shard must exceed this many visits
    #[serde(default = "default_upper_threshold")]
    pub upper_threshold: u64,
    /// The coldest candidate must exceed this many visits
    #[serde(default = "default_lower_threshold")]
    pub lower_threshold: u64,
}

impl RebalanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            upper: self.upper_threshold,
            lower: self.lower_threshold,
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_rebalance_enabled(),
            interval_secs: default_interval_secs(),
            upper_threshold: default_upper_threshold(),
            lower_threshold: default_lower_threshold(),
        }
    }
}

/// Calls to shard nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardClientConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ShardClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_shards() -> u32 {
    8
}

fn default_hash_space() -> u32 {
    DEFAULT_HASH_SPACE
}

fn default_rebalance_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    10
}

fn default_upper_threshold() -> u64 {
    50
}

fn default_lower_threshold() -> u64 {
    5
}

fn default_request_timeout_ms() -> u64 {
    // migrations run inside one /hotsend call
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

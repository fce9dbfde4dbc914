//! Configuration for a Tessel shard node
//!
//! YAML file with one section per concern. Every field has a default, so an
//! empty file is a valid single-machine configuration.

use std::path::PathBuf;
use std::time::Duration;

use keeper::RemoteStoreConfig;
use serde::{Deserialize, Serialize};
use ts_core::DEFAULT_HASH_SPACE;

use crate::replication::AckPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    /// Coordination store connection
    #[serde(default)]
    pub keeper: RemoteStoreConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
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
        if self.node.advertise_addr.is_empty() {
            return Err(ConfigError::Invalid("node.advertise_addr is empty".into()));
        }
        if self.cluster.max_shards == 0 {
            return Err(ConfigError::Invalid("cluster.max_shards must be > 0".into()));
        }
        if self.cluster.hash_space == 0 {
            return Err(ConfigError::Invalid("cluster.hash_space must be > 0".into()));
        }
        Ok(())
    }
}

/// Node identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `host:port` that peers and the coordinator use to reach this node
    #[serde(default = "default_advertise_addr")]
    pub advertise_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            advertise_addr: default_advertise_addr(),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP listen address
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

/// Cluster shape; must match the coordinator's
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_max_shards")]
    pub max_shards: u32,
    #[serde(default = "default_max_followers")]
    pub max_followers: u32,
    #[serde(default = "default_hash_space")]
    pub hash_space: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_shards: default_max_shards(),
            max_followers: default_max_followers(),
            hash_space: default_hash_space(),
        }
    }
}

/// Local SQL store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, `:memory:` for a throwaway store
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Replication and peer-call settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub ack_policy: AckPolicy,
    /// Bound on the leader's readiness wait before forwarding
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    #[serde(default = "default_peer_connect_timeout_ms")]
    pub peer_connect_timeout_ms: u64,
}

impl ReplicationConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            ack_policy: AckPolicy::default(),
            ready_timeout_ms: default_ready_timeout_ms(),
            peer_timeout_ms: default_peer_timeout_ms(),
            peer_connect_timeout_ms: default_peer_connect_timeout_ms(),
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

fn default_advertise_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_max_shards() -> u32 {
    8
}

fn default_max_followers() -> u32 {
    2
}

fn default_hash_space() -> u32 {
    DEFAULT_HASH_SPACE
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./tessel.db")
}

fn default_ready_timeout_ms() -> u64 {
    5000
}

fn default_peer_timeout_ms() -> u64 {
    3000
}

fn default_peer_connect_timeout_ms() -> u64 {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.cluster.max_shards, 8);
        assert_eq!(config.cluster.hash_space, DEFAULT_HASH_SPACE);
        assert_eq!(config.replication.ack_policy, AckPolicy::BestEffort);
        assert_eq!(config.keeper.session_ttl_ms, 6000);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
node:
  advertise_addr: "10.0.0.5:9090"
cluster:
  max_shards: 4
  max_followers: 1
keeper:
  addrs:
    - "http://10.0.0.1:2181"
    - "http://10.0.0.2:2181"
replication:
  ack_policy: all
  ready_timeout_ms: 200
log:
  level: debug
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.node.advertise_addr, "10.0.0.5:9090");
        assert_eq!(config.cluster.max_shards, 4);
        assert_eq!(config.cluster.max_followers, 1);
        assert_eq!(config.cluster.hash_space, DEFAULT_HASH_SPACE);
        assert_eq!(
            config.keeper.addrs,
            vec!["http://10.0.0.1:2181", "http://10.0.0.2:2181"]
        );
        assert_eq!(config.replication.ack_policy, AckPolicy::All);
        assert_eq!(config.replication.ready_timeout(), Duration::from_millis(200));
        assert_eq!(config.log.level, "debug");

        let reparsed = Config::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed.node.advertise_addr, config.node.advertise_addr);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_yaml("cluster:\n  max_shards: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("cluster: [1, 2]"),
            Err(ConfigError::ParseError(_))
        ));
    }
}

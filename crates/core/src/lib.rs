//! Core types shared by the Tessel coordinator and shard nodes
//!
//! Provides:
//! - Hash-range partitions and the cluster-wide key hash
//! - Table checksums used for repair and read voting
//! - The coordination-store path layout
//! - Wire types and the status/message/data response envelope

pub mod api;
pub mod checksum;
pub mod error;
pub mod partition;
pub mod paths;
pub mod protocol;

pub use api::{ApiResult, StatusCode};
pub use checksum::ChecksumDigest;
pub use error::ClusterError;
pub use partition::{hash_key, HashRange, ShardId, TablePartition, DEFAULT_HASH_SPACE};
pub use protocol::{ReplicaRole, Value};

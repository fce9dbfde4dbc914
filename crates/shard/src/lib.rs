//! Tessel shard node
//!
//! A shard node owns hash-range slices of SQL tables and replicates them from
//! the shard leader to its followers:
//! - [`membership`]: leader election and the follower/partition registry
//! - [`replication`]: local apply, fan-out and checksum repair
//! - [`quorum`]: checksum-voted reads
//! - [`migration`]: moving a partition half to another shard

pub mod api;
pub mod config;
pub mod membership;
pub mod migration;
pub mod node;
pub mod peer;
pub mod quorum;
pub mod replication;
pub mod sql;
pub mod visits;

pub use config::{Config, ConfigError};
pub use membership::{JoinOutcome, PromotionOutcome, ShardMembership};
pub use node::ShardNode;
pub use peer::{HttpPeerClient, PeerClient, PeerError};
pub use replication::{AckPolicy, Replicator, WriteKind};
pub use sql::{SqlEngine, SqlError, SqliteEngine};

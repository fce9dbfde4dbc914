//! Wire types carried between coordinator, shard nodes and clients
//!
//! All request/response bodies are JSON with camelCase field names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumDigest;
use crate::partition::{HashRange, ShardId, TablePartition};

/// Shard-local replica role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    Leader,
    Follower,
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaRole::Leader => write!(f, "leader"),
            ReplicaRole::Follower => write!(f, "follower"),
        }
    }
}

/// A single SQL cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Render as a SQL literal for generated statements
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => format!("{:?}", r),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Blob(b) => format!("X'{}'", hex(b)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Text form used for checksums and key hashing
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "{}", hex(b)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ==================== Shard node requests ====================

/// Single statement write/read request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlRequest {
    pub sql: String,
    pub table_name: String,
    /// Leader's checksum after applying `sql`; present only on forwarded writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumDigest>,
    /// Partition to register on create; full hash space when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<HashRange>,
}

impl SqlRequest {
    pub fn new(sql: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            table_name: table_name.into(),
            checksum: None,
            range: None,
        }
    }

    pub fn with_checksum(mut self, checksum: ChecksumDigest) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_range(mut self, range: HashRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Sent by another replica: a leader forward or a migration's schema create
    pub fn is_internal(&self) -> bool {
        self.checksum.is_some() || self.range.is_some()
    }
}

/// Batch write request, replayed as one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlBatchRequest {
    pub sql_list: Vec<String>,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumDigest>,
}

/// Table name only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRequest {
    pub table_name: String,
}

/// Result of a write on a shard node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteAck {
    /// Local checksum of the table after the write
    pub checksum: ChecksumDigest,
    /// Followers the write was forwarded to
    pub forwarded: usize,
    /// Followers that acknowledged
    pub acknowledged: usize,
    /// Whether this replica had to repair from its leader
    pub repaired: bool,
}

/// Materialized result set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn checksum(&self) -> ChecksumDigest {
        ChecksumDigest::of_rows(&self.rows)
    }
}

/// A replica's checksum for a voted query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub checksum: ChecksumDigest,
}

/// Quorum-confirmed read result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub checksum: ChecksumDigest,
    /// Replicas agreeing with the local checksum, self included
    pub agreements: usize,
    /// Replicas in the shard, self included
    pub replicas: usize,
}

/// Full copy of one table, used by checksum repair and follower bootstrap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDump {
    pub table_name: String,
    pub create_sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// `{tableName, newStart, newEnd, oldStart, oldEnd}`
///
/// `new*` is the range moved to the target shard, `old*` the range the source
/// keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSpec {
    pub table_name: String,
    pub new_start: u32,
    pub new_end: u32,
    pub old_start: u32,
    pub old_end: u32,
}

impl TransferSpec {
    /// Split `range` at its midpoint, moving the upper half
    pub fn split(table_name: impl Into<String>, range: HashRange) -> Option<Self> {
        let (kept, moved) = range.split_at_midpoint()?;
        Some(Self {
            table_name: table_name.into(),
            new_start: moved.start,
            new_end: moved.end,
            old_start: kept.start,
            old_end: kept.end,
        })
    }

    pub fn moved(&self) -> HashRange {
        HashRange {
            start: self.new_start,
            end: self.new_end,
        }
    }

    pub fn kept(&self) -> HashRange {
        HashRange {
            start: self.old_start,
            end: self.old_end,
        }
    }
}

/// `/hotsend` query string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotSendParams {
    pub target_addr: String,
    pub target_shard_id: ShardId,
}

/// Per-table outcome of a migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMigration {
    pub table_name: String,
    pub rows_moved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMigrationFailure {
    pub table_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub moved: Vec<TableMigration>,
    pub failed: Vec<TableMigrationFailure>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn rows_moved(&self) -> usize {
        self.moved.iter().map(|m| m.rows_moved).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitCount {
    pub visit_count: u64,
}

/// Shard node status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub address: String,
    pub shard_id: Option<ShardId>,
    pub role: Option<ReplicaRole>,
    pub ready: bool,
    pub visit_count: u64,
    pub tables: Vec<String>,
}

// ==================== Coordinator responses ====================

/// Replica addresses selected by the router
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostNames {
    pub host_names: Vec<String>,
}

/// One shard in a `/meta_info` snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSnapshot {
    pub shard_id: ShardId,
    pub leader: Option<String>,
    pub followers: Vec<String>,
    pub partitions: Vec<TablePartition>,
    pub visit_count: u64,
    pub locked: bool,
}

impl ShardSnapshot {
    /// A shard with a leader serves reads
    pub fn is_online(&self) -> bool {
        self.leader.is_some()
    }

    /// Online and not part of a running migration
    pub fn is_writable(&self) -> bool {
        self.is_online() && !self.locked
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.partitions.iter().any(|p| p.table_name == table)
    }

    pub fn range_of(&self, table: &str) -> Option<HashRange> {
        self.partitions
            .iter()
            .find(|p| p.table_name == table)
            .map(|p| p.range)
    }

    /// Leader first, then followers
    pub fn replicas(&self) -> impl Iterator<Item = &String> {
        self.leader.iter().chain(self.followers.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub hash_space: u32,
    pub shards: Vec<ShardSnapshot>,
}

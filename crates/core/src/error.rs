//! Cluster error taxonomy

use thiserror::Error;

use crate::api::StatusCode;
use crate::checksum::ChecksumDigest;

#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    #[error("table {0} already exists")]
    TableExists(String),
    #[error("table {0} does not exist")]
    TableNotFound(String),
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    #[error("no writable shard available for table {0}")]
    NoWritableShard(String),
    #[error("key {key} of table {table} hashes to {hash}, which no writable shard owns")]
    KeyOutOfPartition { table: String, key: String, hash: u32 },
    #[error("checksum mismatch on {table}: local {local}, leader {expected}")]
    ChecksumMismatch {
        table: String,
        local: ChecksumDigest,
        expected: ChecksumDigest,
    },
    #[error("quorum not reached: {agreements} of {replicas} replicas agree")]
    QuorumFailure { agreements: usize, replicas: usize },
    #[error("coordination session lost: {0}")]
    CoordinationSessionLoss(String),
    #[error("migration partially failed: {0}")]
    MigrationPartialFailure(String),
    #[error("node is not a member of any shard")]
    NotMember,
    #[error("replica not ready: {0}")]
    NotReady(String),
    #[error("write acknowledged by {acknowledged} followers, {required} required")]
    ReplicationUnderAcked { acknowledged: usize, required: usize },
    #[error("table {0} has no primary key")]
    MissingKey(String),
    #[error("statement failed: {0}")]
    Execution(String),
    #[error("coordination error: {0}")]
    Coordination(String),
    #[error("peer {addr} failed: {reason}")]
    Peer { addr: String, reason: String },
}

impl ClusterError {
    pub fn status(&self) -> StatusCode {
        match self {
            ClusterError::TableExists(_) => StatusCode::TableExists,
            ClusterError::TableNotFound(_) => StatusCode::TableNotExist,
            ClusterError::NoWritableShard(_) => StatusCode::NoWritableShard,
            ClusterError::KeyOutOfPartition { .. } => StatusCode::KeyOutOfPartition,
            ClusterError::ChecksumMismatch { .. } => StatusCode::ChecksumMismatch,
            ClusterError::QuorumFailure { .. } => StatusCode::QuorumFailure,
            ClusterError::MigrationPartialFailure(_) => StatusCode::MigrationPartialFailure,
            ClusterError::NotReady(_) => StatusCode::NotReady,
            ClusterError::CoordinationSessionLoss(_)
            | ClusterError::InvalidTableName(_)
            | ClusterError::NotMember
            | ClusterError::ReplicationUnderAcked { .. }
            | ClusterError::MissingKey(_)
            | ClusterError::Execution(_)
            | ClusterError::Coordination(_)
            | ClusterError::Peer { .. } => StatusCode::Failed,
        }
    }

    /// Rebuild a typed error from a remote envelope
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::TableExists => ClusterError::TableExists(message),
            StatusCode::TableNotExist => ClusterError::TableNotFound(message),
            StatusCode::NoWritableShard => ClusterError::NoWritableShard(message),
            StatusCode::NotReady => ClusterError::NotReady(message),
            StatusCode::QuorumFailure => {
                let mut counts = message
                    .split(|c: char| !c.is_ascii_digit())
                    .filter_map(|n| n.parse().ok());
                ClusterError::QuorumFailure {
                    agreements: counts.next().unwrap_or(0),
                    replicas: counts.next().unwrap_or(0),
                }
            }
            StatusCode::KeyOutOfPartition => key_out_of_partition(&message),
            StatusCode::MigrationPartialFailure => ClusterError::MigrationPartialFailure(message),
            _ => ClusterError::Execution(message),
        }
    }
}

/// Recover the fields from the `KeyOutOfPartition` display text. The kind
/// survives even when the text does not parse.
fn key_out_of_partition(message: &str) -> ClusterError {
    let parsed = message.strip_prefix("key ").and_then(|rest| {
        let (key, rest) = rest.split_once(" of table ")?;
        let (table, rest) = rest.split_once(" hashes to ")?;
        let hash = rest.split(',').next()?.parse().ok()?;
        Some((key, table, hash))
    });
    match parsed {
        Some((key, table, hash)) => ClusterError::KeyOutOfPartition {
            table: table.to_string(),
            key: key.to_string(),
            hash,
        },
        None => ClusterError::KeyOutOfPartition {
            table: String::new(),
            key: message.to_string(),
            hash: 0,
        },
    }
}

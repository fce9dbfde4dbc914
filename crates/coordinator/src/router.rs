//! Request routing
//!
//! Maps an operation on a table to the shard replicas that must serve it.
//! Every decision reads the catalog afresh, so a shard locked for migration
//! is deflected as soon as the lock event arrives.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};
use ts_core::protocol::ShardSnapshot;
use ts_core::{hash_key, ClusterError};

use crate::catalog::PartitionCatalog;

/// Client-facing operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    Create,
    Query,
    /// Point insert by primary-key value
    Insert { key: &'a str },
    Update,
    Delete,
    Drop,
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Query => write!(f, "query"),
            Operation::Insert { .. } => write!(f, "insert"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::Drop => write!(f, "drop"),
        }
    }
}

pub struct Router {
    catalog: Arc<PartitionCatalog>,
}

impl Router {
    pub fn new(catalog: Arc<PartitionCatalog>) -> Self {
        Self { catalog }
    }

    /// Addresses that must handle `op` on `table`
    pub fn route(&self, op: Operation<'_>, table: &str) -> Result<Vec<String>, ClusterError> {
        let hosts = match op {
            Operation::Create => self.route_create(table)?,
            Operation::Query => self.route_query(table)?,
            Operation::Insert { key } => self.route_insert(table, key)?,
            Operation::Update | Operation::Delete | Operation::Drop => self.route_write(table)?,
        };
        debug!("Routed {} on {} to {:?}", op, table, hosts);
        Ok(hosts)
    }

    /// Leader of the writable shard holding the fewest partitions, among
    /// shards without the table. Ties go to the lowest shard id.
    fn route_create(&self, table: &str) -> Result<Vec<String>, ClusterError> {
        // the name becomes a keeper path segment
        if table.is_empty() || table.contains('/') {
            return Err(ClusterError::InvalidTableName(table.to_string()));
        }
        if self.catalog.has_table(table) {
            return Err(ClusterError::TableExists(table.to_string()));
        }
        let chosen = self
            .catalog
            .shards()
            .into_iter()
            .filter(|shard| shard.is_writable() && !shard.has_table(table))
            .fold(None, |best: Option<ShardSnapshot>, shard| match best {
                Some(b) if b.partitions.len() <= shard.partitions.len() => Some(b),
                _ => Some(shard),
            });
        match chosen.and_then(|shard| shard.leader.map(|leader| (shard.shard_id, leader))) {
            Some((shard, leader)) => {
                info!("Table {} goes to shard {} at {}", table, shard, leader);
                Ok(vec![leader])
            }
            None => Err(ClusterError::NoWritableShard(table.to_string())),
        }
    }

    /// One handler per online shard holding the table
    fn route_query(&self, table: &str) -> Result<Vec<String>, ClusterError> {
        if !self.catalog.has_table(table) {
            return Err(ClusterError::TableNotFound(table.to_string()));
        }
        let hosts: Vec<String> = self
            .catalog
            .shards()
            .iter()
            .filter(|shard| shard.is_online() && shard.has_table(table))
            .filter_map(|shard| self.catalog.handler(shard.shard_id))
            .collect();
        if hosts.is_empty() {
            return Err(ClusterError::NoWritableShard(table.to_string()));
        }
        Ok(hosts)
    }

    /// The leader of the one shard whose range holds the key's hash
    fn route_insert(&self, table: &str, key: &str) -> Result<Vec<String>, ClusterError> {
        if !self.catalog.has_table(table) {
            return Err(ClusterError::TableNotFound(table.to_string()));
        }
        let hash = hash_key(key, self.catalog.hash_space());
        let owner = self
            .catalog
            .shards()
            .into_iter()
            .find(|shard| shard.range_of(table).is_some_and(|r| r.contains(hash)));

        match owner {
            Some(shard) if shard.is_writable() => Ok(shard.leader.into_iter().collect()),
            Some(shard) => {
                warn!(
                    "Key {} of {} hashes to {} on shard {}, which is not writable",
                    key, table, hash, shard.shard_id
                );
                Err(ClusterError::KeyOutOfPartition {
                    table: table.to_string(),
                    key: key.to_string(),
                    hash,
                })
            }
            None => {
                warn!("Key {} of {} hashes to {}, owned by no shard", key, table, hash);
                Err(ClusterError::KeyOutOfPartition {
                    table: table.to_string(),
                    key: key.to_string(),
                    hash,
                })
            }
        }
    }

    /// Leaders of every writable shard holding the table
    fn route_write(&self, table: &str) -> Result<Vec<String>, ClusterError> {
        if !self.catalog.has_table(table) {
            return Err(ClusterError::TableNotFound(table.to_string()));
        }
        let hosts: Vec<String> = self
            .catalog
            .shards()
            .into_iter()
            .filter(|shard| shard.is_writable() && shard.has_table(table))
            .filter_map(|shard| shard.leader)
            .collect();
        if hosts.is_empty() {
            return Err(ClusterError::NoWritableShard(table.to_string()));
        }
        Ok(hosts)
    }
}

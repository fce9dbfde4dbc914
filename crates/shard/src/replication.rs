//! Replication engine
//!
//! A write is applied locally first. On a follower the result is checked
//! against the leader's checksum and repaired by a full table copy on
//! mismatch. On the leader it is forwarded to every follower, one call at a
//! time; a failing follower does not stop the others.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ts_core::protocol::{SqlBatchRequest, SqlRequest, WriteAck};
use ts_core::{ChecksumDigest, ClusterError, HashRange, ReplicaRole};

use crate::membership::ShardMembership;
use crate::peer::PeerClient;
use crate::sql::SqlEngine;

/// Mutating statement kind, which also decides registry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Registers the table on the leader
    Create,
    /// Unregisters the table on the leader
    Drop,
    Update,
}

impl WriteKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            WriteKind::Create => "create",
            WriteKind::Drop => "drop",
            WriteKind::Update => "update",
        }
    }
}

/// How many follower acknowledgements a leader write needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Forward to everyone, succeed regardless
    #[default]
    BestEffort,
    /// At least this many followers (capped at the follower count)
    AtLeast(usize),
    /// Every registered follower
    All,
}

impl AckPolicy {
    pub fn required(&self, followers: usize) -> usize {
        match self {
            AckPolicy::BestEffort => 0,
            AckPolicy::AtLeast(k) => (*k).min(followers),
            AckPolicy::All => followers,
        }
    }
}

pub struct Replicator {
    engine: Arc<dyn SqlEngine>,
    membership: Arc<ShardMembership>,
    peers: Arc<dyn PeerClient>,
    policy: AckPolicy,
    ready_timeout: Duration,
}

impl Replicator {
    pub fn new(
        engine: Arc<dyn SqlEngine>,
        membership: Arc<ShardMembership>,
        peers: Arc<dyn PeerClient>,
        policy: AckPolicy,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            membership,
            peers,
            policy,
            ready_timeout,
        }
    }

    pub fn policy(&self) -> AckPolicy {
        self.policy
    }

    /// Apply one statement on this replica and, on the leader, replicate it
    pub async fn apply(&self, kind: WriteKind, req: &SqlRequest) -> Result<WriteAck, ClusterError> {
        let table = req.table_name.as_str();
        self.precheck(kind, table).await?;

        debug!("Executing {} on {}: {}", kind.endpoint(), table, req.sql);
        self.engine.execute(&req.sql)?;

        match self.membership.role() {
            Some(ReplicaRole::Leader) => {
                self.await_ready().await?;
                let checksum = self.engine.table_checksum(table)?;
                let forwarded = req.clone().with_checksum(checksum);
                let (targets, acknowledged) = self
                    .fan_out(table, |peers, addr| {
                        let forwarded = forwarded.clone();
                        async move { peers.write(&addr, kind, &forwarded).await }
                    })
                    .await;

                // the table is gone locally whether or not followers agree
                if kind == WriteKind::Drop {
                    self.membership.unregister_table(table).await?;
                }
                self.check_acks(targets, acknowledged)?;
                if kind == WriteKind::Create {
                    let range = req
                        .range
                        .unwrap_or_else(|| HashRange::full(self.membership.hash_space()));
                    self.membership.register_table(table, range).await?;
                }
                Ok(WriteAck {
                    checksum,
                    forwarded: targets,
                    acknowledged,
                    repaired: false,
                })
            }
            Some(ReplicaRole::Follower) => {
                let (checksum, repaired) = self.verify(table, req.checksum).await?;
                Ok(WriteAck {
                    checksum,
                    forwarded: 0,
                    acknowledged: 0,
                    repaired,
                })
            }
            None => Err(ClusterError::NotMember),
        }
    }

    /// Apply a statement list as one transaction and replicate it as a unit
    pub async fn apply_batch(&self, req: &SqlBatchRequest) -> Result<WriteAck, ClusterError> {
        let table = req.table_name.as_str();
        self.precheck(WriteKind::Update, table).await?;

        debug!("Executing batch of {} on {}", req.sql_list.len(), table);
        self.engine.execute_batch(&req.sql_list)?;

        match self.membership.role() {
            Some(ReplicaRole::Leader) => {
                self.await_ready().await?;
                let checksum = self.engine.table_checksum(table)?;
                let forwarded = SqlBatchRequest {
                    sql_list: req.sql_list.clone(),
                    table_name: req.table_name.clone(),
                    checksum: Some(checksum),
                };
                let (targets, acknowledged) = self
                    .fan_out(table, |peers, addr| {
                        let forwarded = forwarded.clone();
                        async move { peers.write_batch(&addr, &forwarded).await }
                    })
                    .await;
                self.check_acks(targets, acknowledged)?;
                Ok(WriteAck {
                    checksum,
                    forwarded: targets,
                    acknowledged,
                    repaired: false,
                })
            }
            Some(ReplicaRole::Follower) => {
                let (checksum, repaired) = self.verify(table, req.checksum).await?;
                Ok(WriteAck {
                    checksum,
                    forwarded: 0,
                    acknowledged: 0,
                    repaired,
                })
            }
            None => Err(ClusterError::NotMember),
        }
    }

    /// Replace the local copy of `table` with the leader's
    pub async fn repair_table(&self, table: &str) -> Result<(), ClusterError> {
        let leader = self
            .membership
            .leader_address()
            .await?
            .ok_or_else(|| ClusterError::Coordination("shard has no leader".to_string()))?;
        let dump = self
            .peers
            .dump(&leader, table)
            .await
            .map_err(|e| e.into_cluster_error(&leader))?;
        match dump {
            Some(dump) => self.engine.replace_table(&dump)?,
            None => self.engine.drop_table(table)?,
        }
        info!("Copied table {} from leader {}", table, leader);
        Ok(())
    }

    async fn precheck(&self, kind: WriteKind, table: &str) -> Result<(), ClusterError> {
        let registered = self.membership.has_table(table).await?;
        match kind {
            WriteKind::Create if registered => Err(ClusterError::TableExists(table.to_string())),
            WriteKind::Drop | WriteKind::Update if !registered => {
                Err(ClusterError::TableNotFound(table.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn await_ready(&self) -> Result<(), ClusterError> {
        if self.membership.ready().wait(self.ready_timeout).await {
            Ok(())
        } else {
            Err(ClusterError::NotReady(format!(
                "membership not ready after {:?}",
                self.ready_timeout
            )))
        }
    }

    /// Compare with the leader's checksum and repair on mismatch
    async fn verify(
        &self,
        table: &str,
        expected: Option<ChecksumDigest>,
    ) -> Result<(ChecksumDigest, bool), ClusterError> {
        let local = self.engine.table_checksum(table)?;
        let Some(expected) = expected else {
            return Ok((local, false));
        };
        if local == expected {
            return Ok((local, false));
        }

        warn!(
            "Checksum mismatch on {}: local {}, leader {}; copying from leader",
            table, local, expected
        );
        self.repair_table(table).await?;
        let repaired = self.engine.table_checksum(table)?;
        if repaired != expected {
            return Err(ClusterError::ChecksumMismatch {
                table: table.to_string(),
                local: repaired,
                expected,
            });
        }
        Ok((repaired, true))
    }

    /// Send to every follower in turn; returns (targets, acknowledged)
    async fn fan_out<F, Fut>(&self, table: &str, send: F) -> (usize, usize)
    where
        F: Fn(Arc<dyn PeerClient>, String) -> Fut,
        Fut: std::future::Future<Output = Result<WriteAck, crate::peer::PeerError>>,
    {
        let followers = match self.membership.follower_addresses().await {
            Ok(followers) => followers,
            Err(e) => {
                warn!("Cannot list followers for {}: {}", table, e);
                return (0, 0);
            }
        };

        let mut acknowledged = 0;
        for addr in &followers {
            match send(self.peers.clone(), addr.clone()).await {
                Ok(ack) => {
                    acknowledged += 1;
                    debug!("Forwarded {} to {} (repaired: {})", table, addr, ack.repaired);
                }
                Err(e) => warn!("Forward of {} to {} failed: {}", table, addr, e),
            }
        }
        (followers.len(), acknowledged)
    }

    fn check_acks(&self, targets: usize, acknowledged: usize) -> Result<(), ClusterError> {
        let required = self.policy.required(targets);
        if acknowledged < required {
            return Err(ClusterError::ReplicationUnderAcked {
                acknowledged,
                required,
            });
        }
        Ok(())
    }
}

//! Checksum-voted reads
//!
//! The local result is the candidate; every other replica reports its checksum
//! for the same query and the read is accepted once a majority (self included)
//! agrees. A replica that fails to answer counts as disagreeing.

use std::sync::Arc;

use tracing::{debug, warn};
use ts_core::protocol::{QueryResult, SqlRequest};
use ts_core::{ChecksumDigest, ClusterError};

use crate::membership::ShardMembership;
use crate::peer::PeerClient;
use crate::sql::SqlEngine;

/// `agreements >= floor(replicas / 2) + 1`
pub fn quorum_reached(agreements: usize, replicas: usize) -> bool {
    agreements >= replicas / 2 + 1
}

pub struct ReadQuorum {
    engine: Arc<dyn SqlEngine>,
    membership: Arc<ShardMembership>,
    peers: Arc<dyn PeerClient>,
}

impl ReadQuorum {
    pub fn new(
        engine: Arc<dyn SqlEngine>,
        membership: Arc<ShardMembership>,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            engine,
            membership,
            peers,
        }
    }

    pub async fn query(&self, req: &SqlRequest) -> Result<QueryResult, ClusterError> {
        if !self.membership.has_table(&req.table_name).await? {
            return Err(ClusterError::TableNotFound(req.table_name.clone()));
        }

        let local = self.engine.query(&req.sql)?;
        let checksum = local.checksum();
        let peers = self.membership.peer_addresses().await?;
        let replicas = peers.len() + 1;

        let ballot = SqlRequest::new(req.sql.clone(), req.table_name.clone());
        let mut agreements = 1;
        for addr in &peers {
            match self.peers.vote(addr, &ballot).await {
                Ok(theirs) if theirs == checksum => agreements += 1,
                Ok(theirs) => warn!(
                    "Replica {} disagrees on {}: {} vs local {}",
                    addr, req.table_name, theirs, checksum
                ),
                Err(e) => warn!("Replica {} did not vote: {}", addr, e),
            }
        }

        if !quorum_reached(agreements, replicas) {
            return Err(ClusterError::QuorumFailure {
                agreements,
                replicas,
            });
        }
        debug!(
            "Query on {} accepted by {}/{} replicas",
            req.table_name, agreements, replicas
        );
        Ok(QueryResult {
            columns: local.columns,
            rows: local.rows,
            checksum,
            agreements,
            replicas,
        })
    }

    /// This replica's checksum for a query
    pub fn vote(&self, req: &SqlRequest) -> Result<ChecksumDigest, ClusterError> {
        Ok(self.engine.query(&req.sql)?.checksum())
    }
}

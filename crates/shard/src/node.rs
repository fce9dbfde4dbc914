//! Shard node composition root

use std::sync::Arc;
use std::time::Duration;

use keeper::{CoordinationStore, WatchEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use ts_core::paths::ShardPath;
use ts_core::protocol::{
    MigrationReport, NodeStatus, QueryResult, SqlBatchRequest, SqlRequest, TableDump,
    TransferSpec, WriteAck,
};
use ts_core::{ChecksumDigest, ClusterError, ReplicaRole, ShardId};

use crate::config::Config;
use crate::membership::{JoinOutcome, MembershipConfig, PromotionOutcome, ShardMembership};
use crate::migration::Migrator;
use crate::peer::PeerClient;
use crate::quorum::ReadQuorum;
use crate::replication::{Replicator, WriteKind};
use crate::sql::SqlEngine;
use crate::visits::VisitCounter;

/// Pause between rejoin attempts after a lost session
const REJOIN_BACKOFF: Duration = Duration::from_secs(1);

pub struct ShardNode {
    store: Arc<dyn CoordinationStore>,
    engine: Arc<dyn SqlEngine>,
    membership: Arc<ShardMembership>,
    replicator: Arc<Replicator>,
    quorum: ReadQuorum,
    migrator: Migrator,
    visits: VisitCounter,
}

impl ShardNode {
    pub fn new(
        config: &Config,
        store: Arc<dyn CoordinationStore>,
        engine: Arc<dyn SqlEngine>,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        let membership = Arc::new(ShardMembership::new(
            store.clone(),
            config.node.advertise_addr.clone(),
            MembershipConfig {
                max_shards: config.cluster.max_shards,
                max_followers: config.cluster.max_followers,
                hash_space: config.cluster.hash_space,
            },
        ));
        let replicator = Arc::new(Replicator::new(
            engine.clone(),
            membership.clone(),
            peers.clone(),
            config.replication.ack_policy,
            config.replication.ready_timeout(),
        ));
        let quorum = ReadQuorum::new(engine.clone(), membership.clone(), peers.clone());
        let migrator = Migrator::new(engine.clone(), membership.clone(), replicator.clone(), peers);

        Self {
            store,
            engine,
            membership,
            replicator,
            quorum,
            migrator,
            visits: VisitCounter::new(),
        }
    }

    pub fn address(&self) -> &str {
        self.membership.address()
    }

    pub fn membership(&self) -> &Arc<ShardMembership> {
        &self.membership
    }

    pub fn engine(&self) -> &Arc<dyn SqlEngine> {
        &self.engine
    }

    /// Join the cluster and start watching the coordination store.
    ///
    /// The subscription is taken before joining so that a leader removal
    /// racing with the join is not missed.
    pub async fn start(self: Arc<Self>) -> Result<(JoinOutcome, JoinHandle<()>), ClusterError> {
        let events = self.store.subscribe();
        let outcome = self.establish().await?;
        let watcher = self.clone().start_watch_loop(events);
        Ok((outcome, watcher))
    }

    /// Join, copy the shard's tables if following, then open the gate
    async fn establish(&self) -> Result<JoinOutcome, ClusterError> {
        let outcome = self.membership.join().await?;
        if let JoinOutcome::Follower { shard, .. } = outcome {
            self.bootstrap(shard).await;
        }
        self.membership.ready().mark_ready();
        Ok(outcome)
    }

    /// Copy every table registered on the shard from its leader
    async fn bootstrap(&self, shard: ShardId) {
        let tables = match self.membership.tables().await {
            Ok(tables) => tables,
            Err(e) => {
                warn!("Cannot list tables of shard {}: {}", shard, e);
                return;
            }
        };
        for table in &tables {
            if let Err(e) = self.replicator.repair_table(table).await {
                warn!("Bootstrap copy of {} failed: {}", table, e);
            }
        }
        info!("Bootstrapped {} tables of shard {}", tables.len(), shard);
    }

    fn start_watch_loop(self: Arc<Self>, mut events: broadcast::Receiver<WatchEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.on_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Watch loop lagged by {} events", missed);
                        self.check_leader().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::NodeDeleted { path, .. } => {
                if let Some(ShardPath::Leader(shard)) = ShardPath::parse(&path) {
                    if self.membership.shard() == Some(shard)
                        && self.membership.role() == Some(ReplicaRole::Follower)
                    {
                        info!("Leader of shard {} is gone, campaigning", shard);
                        self.campaign().await;
                    }
                }
            }
            WatchEvent::SessionExpired { session } if session == self.store.session_id() => {
                self.recover_session().await;
            }
            WatchEvent::Resync => self.check_leader().await,
            _ => {}
        }
    }

    async fn campaign(&self) {
        match self.membership.try_promote().await {
            PromotionOutcome::Promoted => {}
            PromotionOutcome::Lost => info!("{} stays follower", self.address()),
            PromotionOutcome::Abandoned | PromotionOutcome::NotFollower => {}
        }
    }

    /// Campaign if our shard currently has no leader
    async fn check_leader(&self) {
        if self.membership.role() != Some(ReplicaRole::Follower) {
            return;
        }
        match self.membership.leader_address().await {
            Ok(None) => self.campaign().await,
            Ok(Some(_)) => {}
            Err(e) => warn!("Leader check failed: {}", e),
        }
    }

    /// Drop the role, open a new session and join again
    async fn recover_session(&self) {
        error!("{} lost its coordination session", self.address());
        self.membership.invalidate();
        loop {
            let result = async {
                self.store.reconnect().await?;
                self.establish().await
            }
            .await;
            match result {
                Ok(outcome) => {
                    info!("{} rejoined as {:?}", self.address(), outcome);
                    return;
                }
                Err(e) => {
                    warn!("Rejoin failed: {}", e);
                    tokio::time::sleep(REJOIN_BACKOFF).await;
                }
            }
        }
    }

    /// Leave the shard and close the coordination session
    pub async fn shutdown(&self) {
        if let Err(e) = self.membership.leave().await {
            warn!("Leave failed: {}", e);
        }
        if let Err(e) = self.store.close().await {
            warn!("Closing coordination session failed: {}", e);
        }
    }

    // ==================== Request handlers ====================

    pub async fn handle_write(&self, kind: WriteKind, req: &SqlRequest) -> Result<WriteAck, ClusterError> {
        if !req.is_internal() {
            self.visits.record();
        }
        self.replicator.apply(kind, req).await
    }

    pub async fn handle_batch(&self, req: &SqlBatchRequest) -> Result<WriteAck, ClusterError> {
        self.replicator.apply_batch(req).await
    }

    pub async fn handle_query(&self, req: &SqlRequest) -> Result<QueryResult, ClusterError> {
        self.visits.record();
        self.quorum.query(req).await
    }

    pub fn handle_vote(&self, req: &SqlRequest) -> Result<ChecksumDigest, ClusterError> {
        self.quorum.vote(req)
    }

    pub fn handle_dump(&self, table: &str) -> Result<Option<TableDump>, ClusterError> {
        Ok(self.engine.dump_table(table)?)
    }

    pub async fn handle_hot_send(
        &self,
        target_addr: &str,
        target_shard: ShardId,
        specs: &[TransferSpec],
    ) -> Result<MigrationReport, ClusterError> {
        self.migrator.hot_send(target_addr, target_shard, specs).await
    }

    pub fn visit_count(&self) -> u64 {
        self.visits.get()
    }

    pub fn clear_visits(&self) -> u64 {
        self.visits.clear()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            address: self.address().to_string(),
            shard_id: self.membership.shard(),
            role: self.membership.role(),
            ready: self.membership.ready().is_ready(),
            visit_count: self.visits.get(),
            tables: self.engine.list_tables().unwrap_or_default(),
        }
    }
}

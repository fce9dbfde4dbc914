//! Shard membership
//!
//! Per-shard leader election and the follower/partition registry, built on the
//! coordination store's create-if-absent. A node is at most one of: leader of
//! one shard, follower of one shard, or idle.

use std::sync::Arc;
use std::time::Duration;

use keeper::store::{delete_if_exists, ensure_path, upsert};
use keeper::{CoordinationStore, CreateMode, KeeperError};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use ts_core::{paths, ClusterError, HashRange, ReplicaRole, ShardId};

/// Result of a join scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Leader(ShardId),
    Follower { shard: ShardId, slot: u32 },
    /// Every shard has a leader and a full follower set
    Idle,
}

/// Result of a promotion attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    Promoted,
    /// Another follower created the leader node first
    Lost,
    /// A coordination error ended the attempt; the next leader-removal event
    /// triggers another
    Abandoned,
    /// Only followers campaign
    NotFollower,
}

#[derive(Debug, Clone, Copy)]
pub struct MembershipConfig {
    pub max_shards: u32,
    pub max_followers: u32,
    pub hash_space: u32,
}

#[derive(Debug, Default)]
struct MemberState {
    shard: Option<ShardId>,
    role: Option<ReplicaRole>,
    follower_slot: Option<u32>,
}

/// Readiness gate
///
/// Set once membership (and, for followers, the initial copy from the leader)
/// is established. Writers wait on it with a bound instead of spinning.
#[derive(Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until ready, giving up after `timeout`
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        ready
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShardMembership {
    store: Arc<dyn CoordinationStore>,
    address: String,
    config: MembershipConfig,
    state: Mutex<MemberState>,
    ready: ReadinessGate,
}

impl ShardMembership {
    pub fn new(store: Arc<dyn CoordinationStore>, address: String, config: MembershipConfig) -> Self {
        Self {
            store,
            address,
            config,
            state: Mutex::new(MemberState::default()),
            ready: ReadinessGate::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn hash_space(&self) -> u32 {
        self.config.hash_space
    }

    pub fn shard(&self) -> Option<ShardId> {
        self.state.lock().shard
    }

    pub fn role(&self) -> Option<ReplicaRole> {
        self.state.lock().role
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Some(ReplicaRole::Leader)
    }

    pub fn ready(&self) -> &ReadinessGate {
        &self.ready
    }

    fn require_shard(&self) -> Result<ShardId, ClusterError> {
        self.shard().ok_or(ClusterError::NotMember)
    }

    // ==================== Election ====================

    /// Claim a role.
    ///
    /// First pass: the first shard without a leader node, claimed by creating
    /// that node. Second pass: the first led shard with a free follower slot.
    /// Otherwise the node stays idle.
    pub async fn join(&self) -> Result<JoinOutcome, ClusterError> {
        for shard in 0..self.config.max_shards {
            if self.store.exists(&paths::leader(shard)).await? {
                continue;
            }
            match self
                .store
                .create(&paths::leader(shard), &self.address, CreateMode::Ephemeral)
                .await
            {
                Ok(()) => {
                    self.init_registry(shard).await?;
                    self.set_state(Some(shard), Some(ReplicaRole::Leader), None);
                    info!("{} is leader of shard {}", self.address, shard);
                    return Ok(JoinOutcome::Leader(shard));
                }
                Err(KeeperError::NodeExists(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        for shard in 0..self.config.max_shards {
            let taken = self.store.children(&paths::followers_dir(shard)).await?;
            if taken.len() >= self.config.max_followers as usize {
                continue;
            }
            for slot in 0..self.config.max_followers {
                if taken.contains(&format!("f{}", slot)) {
                    continue;
                }
                match self
                    .store
                    .create(&paths::follower(shard, slot), &self.address, CreateMode::Ephemeral)
                    .await
                {
                    Ok(()) => {
                        self.set_state(Some(shard), Some(ReplicaRole::Follower), Some(slot));
                        self.sync_follower_count(shard).await;
                        info!("{} is follower f{} of shard {}", self.address, slot, shard);
                        return Ok(JoinOutcome::Follower { shard, slot });
                    }
                    Err(KeeperError::NodeExists(_)) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        error!(
            "No shard slot available for {}: {} shards, {} followers each, all taken",
            self.address, self.config.max_shards, self.config.max_followers
        );
        self.set_state(None, None, None);
        Ok(JoinOutcome::Idle)
    }

    async fn init_registry(&self, shard: ShardId) -> Result<(), ClusterError> {
        ensure_path(self.store.as_ref(), &paths::followers_dir(shard)).await?;
        ensure_path(self.store.as_ref(), &paths::tables_dir(shard)).await?;
        if !self.store.exists(&paths::follower_count(shard)).await? {
            upsert(self.store.as_ref(), &paths::follower_count(shard), "0").await?;
        }
        Ok(())
    }

    /// Rewrite `followerCount` from the live follower nodes
    async fn sync_follower_count(&self, shard: ShardId) {
        let result = async {
            let live = self.store.children(&paths::followers_dir(shard)).await?;
            upsert(self.store.as_ref(), &paths::follower_count(shard), &live.len().to_string()).await
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to update follower count of shard {}: {}", shard, e);
        }
    }

    /// Try to take over leadership after the leader node disappeared
    pub async fn try_promote(&self) -> PromotionOutcome {
        let (shard, slot) = {
            let state = self.state.lock();
            match (state.shard, state.role) {
                (Some(shard), Some(ReplicaRole::Follower)) => (shard, state.follower_slot),
                _ => return PromotionOutcome::NotFollower,
            }
        };

        match self
            .store
            .create(&paths::leader(shard), &self.address, CreateMode::Ephemeral)
            .await
        {
            Ok(()) => {}
            Err(KeeperError::NodeExists(_)) => {
                debug!("{} lost the election for shard {}", self.address, shard);
                return PromotionOutcome::Lost;
            }
            Err(e) => {
                error!("Election for shard {} abandoned: {}", shard, e);
                return PromotionOutcome::Abandoned;
            }
        }

        self.set_state(Some(shard), Some(ReplicaRole::Leader), None);
        if let Some(slot) = slot {
            if let Err(e) = delete_if_exists(self.store.as_ref(), &paths::follower(shard, slot)).await {
                warn!("Failed to remove follower registration f{}: {}", slot, e);
            }
        }
        if let Err(e) = self.init_registry(shard).await {
            warn!("Failed to initialize registry of shard {}: {}", shard, e);
        }
        self.sync_follower_count(shard).await;
        info!("{} promoted to leader of shard {}", self.address, shard);
        PromotionOutcome::Promoted
    }

    /// Leave the shard cleanly, removing this node's registration
    pub async fn leave(&self) -> Result<(), ClusterError> {
        let (shard, role, slot) = {
            let state = self.state.lock();
            (state.shard, state.role, state.follower_slot)
        };
        let Some(shard) = shard else {
            return Ok(());
        };
        match (role, slot) {
            (Some(ReplicaRole::Leader), _) => {
                delete_if_exists(self.store.as_ref(), &paths::leader(shard)).await?;
            }
            (Some(ReplicaRole::Follower), Some(slot)) => {
                delete_if_exists(self.store.as_ref(), &paths::follower(shard, slot)).await?;
                self.sync_follower_count(shard).await;
            }
            _ => {}
        }
        self.invalidate();
        info!("{} left shard {}", self.address, shard);
        Ok(())
    }

    /// Drop role and readiness after the coordination session was lost
    pub fn invalidate(&self) {
        self.set_state(None, None, None);
        self.ready.reset();
    }

    fn set_state(&self, shard: Option<ShardId>, role: Option<ReplicaRole>, slot: Option<u32>) {
        let mut state = self.state.lock();
        state.shard = shard;
        state.role = role;
        state.follower_slot = slot;
    }

    // ==================== Replica addresses ====================

    pub async fn leader_address(&self) -> Result<Option<String>, ClusterError> {
        let shard = self.require_shard()?;
        Ok(self.store.get(&paths::leader(shard)).await?)
    }

    pub async fn follower_addresses(&self) -> Result<Vec<String>, ClusterError> {
        let shard = self.require_shard()?;
        let mut addrs = Vec::new();
        for name in self.store.children(&paths::followers_dir(shard)).await? {
            let path = format!("{}/{}", paths::followers_dir(shard), name);
            if let Some(addr) = self.store.get(&path).await? {
                addrs.push(addr);
            }
        }
        Ok(addrs)
    }

    /// Every other replica of this shard, leader first
    pub async fn peer_addresses(&self) -> Result<Vec<String>, ClusterError> {
        let mut peers = Vec::new();
        if let Some(leader) = self.leader_address().await? {
            if leader != self.address {
                peers.push(leader);
            }
        }
        for follower in self.follower_addresses().await? {
            if follower != self.address {
                peers.push(follower);
            }
        }
        Ok(peers)
    }

    // ==================== Partition registry ====================

    pub async fn tables(&self) -> Result<Vec<String>, ClusterError> {
        let shard = self.require_shard()?;
        Ok(self.store.children(&paths::tables_dir(shard)).await?)
    }

    pub async fn table_range(&self, table: &str) -> Result<Option<HashRange>, ClusterError> {
        let shard = self.require_shard()?;
        match self.store.get(&paths::table(shard, table)).await? {
            Some(data) => HashRange::parse(&data)
                .map(Some)
                .map_err(|e| ClusterError::Coordination(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn has_table(&self, table: &str) -> Result<bool, ClusterError> {
        let shard = self.require_shard()?;
        Ok(self.store.exists(&paths::table(shard, table)).await?)
    }

    pub async fn register_table(&self, table: &str, range: HashRange) -> Result<(), ClusterError> {
        let shard = self.require_shard()?;
        self.set_table_range(shard, table, range).await
    }

    pub async fn unregister_table(&self, table: &str) -> Result<(), ClusterError> {
        let shard = self.require_shard()?;
        delete_if_exists(self.store.as_ref(), &paths::table(shard, table)).await?;
        Ok(())
    }

    /// Write a table's range on any shard (migration updates both ends)
    pub async fn set_table_range(
        &self,
        shard: ShardId,
        table: &str,
        range: HashRange,
    ) -> Result<(), ClusterError> {
        upsert(self.store.as_ref(), &paths::table(shard, table), &range.encode()).await?;
        Ok(())
    }
}

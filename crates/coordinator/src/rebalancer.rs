//! Hotspot rebalancer
//!
//! Runs on the cluster leader only. Each cycle samples per-shard visit
//! counts, picks the hottest shard and the coldest shard sharing no table
//! with it, and when the skew is large enough asks the hot shard's leader to
//! hand the upper half of every partition to the cold shard. Visit counters
//! are reset at the end of every cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper::store::delete_if_exists;
use keeper::{CoordinationStore, CreateMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use ts_core::protocol::{
    HotSendParams, MigrationReport, ShardSnapshot, TableMigrationFailure, TransferSpec,
    VisitCount,
};
use ts_core::{paths, ApiResult, ClusterError, ShardId, StatusCode};

use crate::catalog::PartitionCatalog;
use crate::election::CoordinatorElection;

// ==================== Shard calls ====================

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rejected with {}: {message}", .status.code())]
    Rejected { status: StatusCode, message: String },
    #[error("reply carried no data")]
    Empty,
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}

/// Coordinator-to-shard calls used by the rebalancer
#[async_trait]
pub trait ShardRpc: Send + Sync {
    async fn visit_count(&self, addr: &str) -> Result<u64, RpcError>;

    async fn clear_visits(&self, addr: &str) -> Result<(), RpcError>;

    /// Ask `source` to move the listed ranges to `target_shard` at `target`
    async fn hot_send(
        &self,
        source: &str,
        target: &str,
        target_shard: ShardId,
        specs: &[TransferSpec],
    ) -> Result<MigrationReport, RpcError>;
}

/// HTTP transport
pub struct HttpShardRpc {
    http: reqwest::Client,
}

impl HttpShardRpc {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn post<T: DeserializeOwned>(&self, url: String) -> Result<ApiResult<T>, RpcError> {
        Ok(self.http.post(url).send().await?.json().await?)
    }
}

#[async_trait]
impl ShardRpc for HttpShardRpc {
    async fn visit_count(&self, addr: &str) -> Result<u64, RpcError> {
        let reply: ApiResult<VisitCount> = self
            .post(format!("http://{}/visiting", addr))
            .await?;
        let count = reply
            .into_result()
            .map_err(|(status, message)| RpcError::Rejected { status, message })?
            .ok_or(RpcError::Empty)?;
        Ok(count.visit_count)
    }

    async fn clear_visits(&self, addr: &str) -> Result<(), RpcError> {
        let reply: ApiResult<VisitCount> = self
            .post(format!("http://{}/visitingClear", addr))
            .await?;
        reply
            .into_result()
            .map_err(|(status, message)| RpcError::Rejected { status, message })?;
        Ok(())
    }

    async fn hot_send(
        &self,
        source: &str,
        target: &str,
        target_shard: ShardId,
        specs: &[TransferSpec],
    ) -> Result<MigrationReport, RpcError> {
        let params = HotSendParams {
            target_addr: target.to_string(),
            target_shard_id: target_shard,
        };
        let reply: ApiResult<MigrationReport> = self
            .http
            .post(format!("http://{}/hotsend", source))
            .query(&params)
            .json(specs)
            .send()
            .await?
            .json()
            .await?;
        // a partial failure still carries the per-table report
        match reply.data {
            Some(report) => Ok(report),
            None => Err(RpcError::Rejected {
                status: reply.status_code(),
                message: reply.message,
            }),
        }
    }
}

// ==================== Decision ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub upper: u64,
    pub lower: u64,
}

/// One shard's sampled load
#[derive(Debug, Clone)]
pub struct ShardLoad {
    pub shard: ShardId,
    pub visits: u64,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotspot {
    pub hot: ShardId,
    pub cold: ShardId,
    pub max: u64,
    pub min: u64,
}

/// Pick the hot/cold pair, or `None` when the cluster is balanced enough.
///
/// A shard is counted only when it becomes the new maximum or the new
/// minimum, and at least two counted shards are needed.
pub fn find_hotspot(loads: &[ShardLoad], thresholds: Thresholds) -> Option<Hotspot> {
    let mut counted = 0;
    let mut hot: Option<&ShardLoad> = None;
    for load in loads {
        if hot.map_or(true, |h| load.visits > h.visits) {
            counted += 1;
            hot = Some(load);
        }
    }
    let hot = hot?;

    let mut cold: Option<&ShardLoad> = None;
    for load in loads {
        if load.shard == hot.shard || load.tables.iter().any(|t| hot.tables.contains(t)) {
            continue;
        }
        if cold.map_or(true, |c| load.visits < c.visits) {
            counted += 1;
            cold = Some(load);
        }
    }
    let Some(cold) = cold else {
        debug!("No shard disjoint from hot shard {}", hot.shard);
        return None;
    };

    let (max, min) = (hot.visits, cold.visits);
    debug!("Max visits {} on shard {}, min {} on shard {}", max, hot.shard, min, cold.shard);
    let triggered = counted >= 2
        && max > min.saturating_mul(2)
        && max > thresholds.upper
        && min > thresholds.lower;
    triggered.then_some(Hotspot {
        hot: hot.shard,
        cold: cold.shard,
        max,
        min,
    })
}

/// Halve every partition of the hot shard; the upper half moves
pub fn plan_splits(hot: &ShardSnapshot) -> Vec<TransferSpec> {
    hot.partitions
        .iter()
        .filter_map(|p| {
            let spec = TransferSpec::split(p.table_name.clone(), p.range);
            if spec.is_none() {
                warn!("Partition {} {} is already minimal", p.table_name, p.range);
            }
            spec
        })
        .collect()
}

// ==================== Rebalancer ====================

/// What one cycle did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RebalanceOutcome {
    /// Not the cluster leader
    Standby,
    Balanced,
    Migrated {
        hotspot: Hotspot,
        report: MigrationReport,
    },
    /// Triggered but nothing moved (no splittable partition or lock held)
    Skipped { hotspot: Hotspot, reason: String },
}

pub struct Rebalancer {
    store: Arc<dyn CoordinationStore>,
    catalog: Arc<PartitionCatalog>,
    election: Arc<CoordinatorElection>,
    rpc: Arc<dyn ShardRpc>,
    thresholds: Thresholds,
}

impl Rebalancer {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        catalog: Arc<PartitionCatalog>,
        election: Arc<CoordinatorElection>,
        rpc: Arc<dyn ShardRpc>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            store,
            catalog,
            election,
            rpc,
            thresholds,
        }
    }

    /// Run one cycle now
    pub async fn run_once(&self) -> Result<RebalanceOutcome, ClusterError> {
        if !self.election.is_leader() {
            debug!("Not cluster leader, skipping hotspot check");
            return Ok(RebalanceOutcome::Standby);
        }
        info!("Checking for hotspots");

        let writable: Vec<ShardSnapshot> = self
            .catalog
            .shards()
            .into_iter()
            .filter(|s| s.is_writable())
            .collect();

        let mut loads = Vec::with_capacity(writable.len());
        for shard in &writable {
            let visits = self.sample(shard).await;
            self.catalog.set_visit_count(shard.shard_id, visits);
            loads.push(ShardLoad {
                shard: shard.shard_id,
                visits,
                tables: shard.partitions.iter().map(|p| p.table_name.clone()).collect(),
            });
        }

        let outcome = match find_hotspot(&loads, self.thresholds) {
            Some(hotspot) => self.migrate(hotspot).await,
            None => {
                info!("No hotspot migration required");
                RebalanceOutcome::Balanced
            }
        };

        self.reset_visits(&writable).await;
        Ok(outcome)
    }

    /// Leader plus follower visits; unreachable replicas count as zero
    async fn sample(&self, shard: &ShardSnapshot) -> u64 {
        let mut total = 0;
        for addr in shard.replicas() {
            match self.rpc.visit_count(addr).await {
                Ok(visits) => total += visits,
                Err(e) => warn!("Visit count from {} unavailable: {}", addr, e),
            }
        }
        total
    }

    async fn reset_visits(&self, shards: &[ShardSnapshot]) {
        for shard in shards {
            for addr in shard.replicas() {
                if let Err(e) = self.rpc.clear_visits(addr).await {
                    warn!("Visit reset on {} failed: {}", addr, e);
                }
            }
            self.catalog.set_visit_count(shard.shard_id, 0);
        }
        debug!("Visit counters reset on {} shards", shards.len());
    }

    async fn migrate(&self, hotspot: Hotspot) -> RebalanceOutcome {
        let skip = |reason: String| {
            warn!("Hotspot on shard {} not migrated: {}", hotspot.hot, reason);
            RebalanceOutcome::Skipped { hotspot, reason }
        };
        let (Some(hot), Some(cold)) = (self.catalog.shard(hotspot.hot), self.catalog.shard(hotspot.cold))
        else {
            return skip("shard left the catalog".to_string());
        };
        let (Some(source), Some(target)) = (hot.leader.clone(), cold.leader.clone()) else {
            return skip("shard has no leader".to_string());
        };
        let specs = plan_splits(&hot);
        if specs.is_empty() {
            return skip("no splittable partition".to_string());
        }

        info!(
            "Hotspot: shard {} ({} visits) hands {} partitions to shard {} ({} visits)",
            hotspot.hot,
            hotspot.max,
            specs.len(),
            hotspot.cold,
            hotspot.min
        );
        if let Err(e) = self.lock(hotspot.hot).await {
            return skip(format!("lock on shard {}: {}", hotspot.hot, e));
        }
        if let Err(e) = self.lock(hotspot.cold).await {
            self.unlock(hotspot.hot).await;
            return skip(format!("lock on shard {}: {}", hotspot.cold, e));
        }

        let result = self.rpc.hot_send(&source, &target, hotspot.cold, &specs).await;

        self.unlock(hotspot.hot).await;
        self.unlock(hotspot.cold).await;

        match result {
            Ok(report) => {
                if report.is_complete() {
                    info!("Migration moved {} rows", report.rows_moved());
                } else {
                    for failure in &report.failed {
                        error!("Migration of {} failed: {}", failure.table_name, failure.reason);
                    }
                }
                RebalanceOutcome::Migrated { hotspot, report }
            }
            Err(e) => {
                error!("Hot send from {} to {} failed: {}", source, target, e);
                RebalanceOutcome::Migrated {
                    hotspot,
                    report: MigrationReport {
                        moved: Vec::new(),
                        failed: specs
                            .iter()
                            .map(|s| TableMigrationFailure {
                                table_name: s.table_name.clone(),
                                reason: e.to_string(),
                            })
                            .collect(),
                    },
                }
            }
        }
    }

    /// Take the migration lock node; fails if another migration holds it
    async fn lock(&self, shard: ShardId) -> Result<(), ClusterError> {
        self.store
            .create(
                &paths::migrating(shard),
                self.election.instance_id(),
                CreateMode::Ephemeral,
            )
            .await?;
        self.catalog.set_locked(shard, true);
        Ok(())
    }

    async fn unlock(&self, shard: ShardId) {
        if let Err(e) = delete_if_exists(self.store.as_ref(), &paths::migrating(shard)).await {
            error!("Releasing migration lock of shard {} failed: {}", shard, e);
        }
        self.catalog.set_locked(shard, false);
    }

    /// Run a cycle on every tick
    pub fn start(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Rebalance cycle failed: {}", e);
                }
            }
        })
    }
}

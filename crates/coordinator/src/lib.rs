//! Tessel coordinator
//!
//! Owns the cluster view and answers routing requests:
//! - [`catalog`]: mirror of every shard's leader, followers and partitions
//! - [`router`]: operation to replica selection
//! - [`election`]: the single cluster-leader role
//! - [`rebalancer`]: hotspot detection and partition splits, leader only
//!
//! # Usage Example
//! ```ignore
//! use coordinator::{Config, Coordinator, HttpShardRpc};
//!
//! let store = keeper::RemoteStore::connect(config.keeper.clone()).await?;
//! let coordinator = Arc::new(Coordinator::new(&config, store, rpc));
//! coordinator.clone().start().await?;
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod election;
pub mod rebalancer;
pub mod router;

pub use catalog::PartitionCatalog;
pub use config::{Config, ConfigError};
pub use election::CoordinatorElection;
pub use rebalancer::{HttpShardRpc, RebalanceOutcome, Rebalancer, ShardRpc};
pub use router::{Operation, Router};

use std::sync::Arc;
use std::time::Duration;

use keeper::{CoordinationStore, WatchEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use ts_core::ClusterError;

/// Pause between reconnect attempts after a lost session
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Coordinator composition root
pub struct Coordinator {
    store: Arc<dyn CoordinationStore>,
    catalog: Arc<PartitionCatalog>,
    router: Router,
    election: Arc<CoordinatorElection>,
    rebalancer: Arc<Rebalancer>,
}

impl Coordinator {
    pub fn new(config: &Config, store: Arc<dyn CoordinationStore>, rpc: Arc<dyn ShardRpc>) -> Self {
        let catalog = Arc::new(PartitionCatalog::new(
            config.cluster.max_shards,
            config.cluster.hash_space,
        ));
        let election = Arc::new(CoordinatorElection::new(store.clone(), config.instance_id()));
        let rebalancer = Arc::new(Rebalancer::new(
            store.clone(),
            catalog.clone(),
            election.clone(),
            rpc,
            config.rebalance.thresholds(),
        ));
        info!(
            "Coordinator {} initialized: {} shards, hash space {}",
            election.instance_id(),
            config.cluster.max_shards,
            config.cluster.hash_space
        );

        Self {
            store,
            router: Router::new(catalog.clone()),
            catalog,
            election,
            rebalancer,
        }
    }

    pub fn catalog(&self) -> &Arc<PartitionCatalog> {
        &self.catalog
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn election(&self) -> &Arc<CoordinatorElection> {
        &self.election
    }

    pub fn rebalancer(&self) -> &Arc<Rebalancer> {
        &self.rebalancer
    }

    /// Load the catalog, campaign, and start following the store.
    ///
    /// Subscribes before the initial load so no change between the two is
    /// lost.
    pub async fn start(self: Arc<Self>) -> Result<JoinHandle<()>, ClusterError> {
        let events = self.store.subscribe();
        self.catalog.rebuild(self.store.as_ref()).await?;
        self.election.campaign().await;
        Ok(self.start_watch_loop(events))
    }

    /// Start the periodic rebalancer
    pub fn start_rebalancer(&self, interval: Duration) -> JoinHandle<()> {
        self.rebalancer.clone().start(interval)
    }

    fn start_watch_loop(self: Arc<Self>, mut events: broadcast::Receiver<WatchEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.on_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Watch loop lagged by {} events, rebuilding", missed);
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_event(&self, event: WatchEvent) {
        match &event {
            WatchEvent::SessionExpired { session } if *session == self.store.session_id() => {
                self.recover_session().await;
            }
            WatchEvent::Resync => self.resync().await,
            _ => {
                self.catalog.apply_event(&event);
                self.election.on_event(&event).await;
            }
        }
    }

    async fn resync(&self) {
        if let Err(e) = self.catalog.rebuild(self.store.as_ref()).await {
            warn!("Catalog rebuild failed: {}", e);
        }
        if !self.election.is_leader() {
            self.election.campaign().await;
        }
    }

    /// Drop leadership, open a new session, re-read everything
    async fn recover_session(&self) {
        error!("Coordinator {} lost its coordination session", self.election.instance_id());
        self.election.invalidate();
        loop {
            let result = async {
                self.store.reconnect().await?;
                self.catalog.rebuild(self.store.as_ref()).await
            }
            .await;
            match result {
                Ok(()) => break,
                Err(e) => {
                    warn!("Reconnect failed: {}", e);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
        self.election.campaign().await;
        info!("Coordinator {} recovered its session", self.election.instance_id());
    }

    /// Resign leadership and close the session
    pub async fn shutdown(&self) {
        if let Err(e) = self.election.resign().await {
            warn!("Resign failed: {}", e);
        }
        if let Err(e) = self.store.close().await {
            warn!("Closing coordination session failed: {}", e);
        }
    }
}

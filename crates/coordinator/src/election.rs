//! Cluster-leader election
//!
//! Coordinators race to create the ephemeral `/coordinator/leader` node. The
//! holder runs the rebalancer; the others keep serving routes and campaign
//! again when the node disappears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keeper::store::delete_if_exists;
use keeper::{CoordinationStore, CreateMode, KeeperError, WatchEvent};
use tracing::{debug, error, info, warn};
use ts_core::paths::COORDINATOR_LEADER;

pub struct CoordinatorElection {
    store: Arc<dyn CoordinationStore>,
    instance_id: String,
    leader: AtomicBool,
}

impl CoordinatorElection {
    pub fn new(store: Arc<dyn CoordinationStore>, instance_id: String) -> Self {
        Self {
            store,
            instance_id,
            leader: AtomicBool::new(false),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// Try to become cluster leader; true if this instance holds the role
    pub async fn campaign(&self) -> bool {
        match self
            .store
            .create(COORDINATOR_LEADER, &self.instance_id, CreateMode::Ephemeral)
            .await
        {
            Ok(()) => {
                self.leader.store(true, Ordering::SeqCst);
                info!("Coordinator {} is cluster leader", self.instance_id);
                true
            }
            Err(KeeperError::NodeExists(_)) => {
                debug!("Coordinator {} stays standby", self.instance_id);
                self.is_leader()
            }
            Err(e) => {
                error!("Coordinator election abandoned: {}", e);
                false
            }
        }
    }

    /// Campaign when the leader node goes away
    pub async fn on_event(&self, event: &WatchEvent) {
        if let WatchEvent::NodeDeleted { path, data } = event {
            if path == COORDINATOR_LEADER {
                if data == &self.instance_id {
                    self.leader.store(false, Ordering::SeqCst);
                }
                self.campaign().await;
            }
        }
    }

    /// Drop the role after the session was lost
    pub fn invalidate(&self) {
        if self.leader.swap(false, Ordering::SeqCst) {
            warn!("Coordinator {} lost cluster leadership", self.instance_id);
        }
    }

    /// Give up the role on clean exit
    pub async fn resign(&self) -> Result<(), KeeperError> {
        if !self.leader.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if self.store.get(COORDINATOR_LEADER).await?.as_deref() == Some(self.instance_id.as_str()) {
            delete_if_exists(self.store.as_ref(), COORDINATOR_LEADER).await?;
        }
        info!("Coordinator {} resigned", self.instance_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper::{Keeper, MemorySession};
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_winner_and_takeover() {
        let keeper = Arc::new(Keeper::new(Duration::from_secs(60)));
        let a_store = Arc::new(MemorySession::open(keeper.clone()));
        let a = CoordinatorElection::new(a_store.clone(), "a".to_string());
        let b = CoordinatorElection::new(Arc::new(MemorySession::open(keeper.clone())), "b".to_string());

        assert!(a.campaign().await);
        assert!(!b.campaign().await);
        assert!(a.is_leader());
        assert!(!b.is_leader());

        let mut events = keeper.subscribe();
        keeper.expire_session(a_store.session_id());
        loop {
            let event = events.recv().await.unwrap();
            a.on_event(&event).await;
            b.on_event(&event).await;
            if matches!(event, WatchEvent::NodeDeleted { .. }) {
                break;
            }
        }
        assert!(b.is_leader());
        assert!(!a.is_leader());
        assert_eq!(keeper.get(COORDINATOR_LEADER).unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_resign_frees_the_role() {
        let keeper = Arc::new(Keeper::new(Duration::from_secs(60)));
        let a = CoordinatorElection::new(Arc::new(MemorySession::open(keeper.clone())), "a".to_string());
        let b = CoordinatorElection::new(Arc::new(MemorySession::open(keeper.clone())), "b".to_string());

        assert!(a.campaign().await);
        a.resign().await.unwrap();
        assert!(!a.is_leader());
        assert!(keeper.get(COORDINATOR_LEADER).unwrap().is_none());
        assert!(b.campaign().await);

        // resigning a role not held is a no-op
        a.resign().await.unwrap();
        assert_eq!(keeper.get(COORDINATOR_LEADER).unwrap().as_deref(), Some("b"));
    }
}

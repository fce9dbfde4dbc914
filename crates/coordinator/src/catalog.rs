//! Partition catalog
//!
//! The coordinator's read-only mirror of every shard's leader, followers,
//! table ranges and migration lock, kept current from coordination-store
//! events. Each shard's view sits behind its own mutex, so shards update
//! independently. The catalog never writes partition state back.

use std::collections::BTreeMap;

use keeper::{CoordinationStore, KeeperError, WatchEvent};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use ts_core::paths::{self, ShardPath};
use ts_core::protocol::{CatalogSnapshot, ShardSnapshot};
use ts_core::{HashRange, ShardId, TablePartition};

#[derive(Debug, Default)]
struct ShardView {
    leader: Option<String>,
    followers: BTreeMap<u32, String>,
    partitions: BTreeMap<String, HashRange>,
    visit_count: u64,
    locked: bool,
    /// Round-robin position over `followers`
    cursor: usize,
}

impl ShardView {
    fn snapshot(&self, shard_id: ShardId) -> ShardSnapshot {
        ShardSnapshot {
            shard_id,
            leader: self.leader.clone(),
            followers: self.followers.values().cloned().collect(),
            partitions: self
                .partitions
                .iter()
                .map(|(table, range)| TablePartition::new(table.clone(), *range))
                .collect(),
            visit_count: self.visit_count,
            locked: self.locked,
        }
    }
}

pub struct PartitionCatalog {
    hash_space: u32,
    shards: Vec<Mutex<ShardView>>,
}

impl PartitionCatalog {
    pub fn new(max_shards: u32, hash_space: u32) -> Self {
        Self {
            hash_space,
            shards: (0..max_shards).map(|_| Mutex::new(ShardView::default())).collect(),
        }
    }

    pub fn hash_space(&self) -> u32 {
        self.hash_space
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    fn view(&self, shard: ShardId) -> Option<&Mutex<ShardView>> {
        self.shards.get(shard as usize)
    }

    // ==================== Updates ====================

    /// Fold one coordination-store event into the affected shard view
    pub fn apply_event(&self, event: &WatchEvent) {
        let (path, data) = match event {
            WatchEvent::NodeCreated { path, data } | WatchEvent::DataChanged { path, data } => {
                (path, Some(data.as_str()))
            }
            WatchEvent::NodeDeleted { path, .. } => (path, None),
            WatchEvent::SessionExpired { .. } | WatchEvent::Resync => return,
        };
        let Some(parsed) = ShardPath::parse(path) else {
            return;
        };
        let Some(view) = self.view(parsed.shard()) else {
            debug!("Ignoring {} beyond the configured shard count", path);
            return;
        };

        let mut view = view.lock();
        match (parsed, data) {
            (ShardPath::Leader(shard), Some(addr)) => {
                info!("Shard {} leader is {}", shard, addr);
                view.leader = Some(addr.to_string());
            }
            (ShardPath::Leader(shard), None) => {
                info!("Shard {} lost its leader", shard);
                view.leader = None;
            }
            (ShardPath::Follower(_, slot), Some(addr)) => {
                view.followers.insert(slot, addr.to_string());
            }
            (ShardPath::Follower(_, slot), None) => {
                view.followers.remove(&slot);
            }
            (ShardPath::Table(shard, table), Some(encoded)) => match HashRange::parse(encoded) {
                Ok(range) => {
                    debug!("Shard {} owns {} {}", shard, table, range);
                    view.partitions.insert(table, range);
                }
                Err(e) => warn!("Bad range for {} on shard {}: {}", table, shard, e),
            },
            (ShardPath::Table(_, table), None) => {
                view.partitions.remove(&table);
            }
            (ShardPath::Migrating(shard), data) => {
                view.locked = data.is_some();
                info!(
                    "Shard {} {}",
                    shard,
                    if view.locked { "locked for migration" } else { "unlocked" }
                );
            }
            (ShardPath::Root(_), None) => *view = ShardView::default(),
            _ => {}
        }
    }

    /// Re-read every shard subtree. Visit counts survive the rebuild.
    pub async fn rebuild(&self, store: &dyn CoordinationStore) -> Result<(), KeeperError> {
        for shard in 0..self.shard_count() {
            let leader = store.get(&paths::leader(shard)).await?;

            let mut followers = BTreeMap::new();
            for name in store.children(&paths::followers_dir(shard)).await? {
                let Some(slot) = paths::follower_slot(&name) else {
                    continue;
                };
                if let Some(addr) = store.get(&paths::follower(shard, slot)).await? {
                    followers.insert(slot, addr);
                }
            }

            let mut partitions = BTreeMap::new();
            for table in store.children(&paths::tables_dir(shard)).await? {
                let Some(encoded) = store.get(&paths::table(shard, &table)).await? else {
                    continue;
                };
                match HashRange::parse(&encoded) {
                    Ok(range) => {
                        partitions.insert(table, range);
                    }
                    Err(e) => warn!("Bad range for {} on shard {}: {}", table, shard, e),
                }
            }

            let locked = store.exists(&paths::migrating(shard)).await?;

            if let Some(view) = self.view(shard) {
                let mut view = view.lock();
                view.leader = leader;
                view.followers = followers;
                view.partitions = partitions;
                view.locked = locked;
                view.cursor = 0;
            }
        }
        info!("Catalog rebuilt for {} shards", self.shard_count());
        Ok(())
    }

    pub fn set_locked(&self, shard: ShardId, locked: bool) {
        if let Some(view) = self.view(shard) {
            view.lock().locked = locked;
        }
    }

    pub fn set_visit_count(&self, shard: ShardId, visits: u64) {
        if let Some(view) = self.view(shard) {
            view.lock().visit_count = visits;
        }
    }

    // ==================== Reads ====================

    pub fn shard(&self, shard: ShardId) -> Option<ShardSnapshot> {
        self.view(shard).map(|view| view.lock().snapshot(shard))
    }

    /// Every shard, each read under its own lock
    pub fn shards(&self) -> Vec<ShardSnapshot> {
        self.shards
            .iter()
            .enumerate()
            .map(|(i, view)| view.lock().snapshot(i as ShardId))
            .collect()
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            hash_space: self.hash_space,
            shards: self.shards(),
        }
    }

    /// A table exists if any shard holds a partition of it
    pub fn has_table(&self, table: &str) -> bool {
        self.shards
            .iter()
            .any(|view| view.lock().partitions.contains_key(table))
    }

    pub fn has_writable(&self) -> bool {
        self.shards.iter().any(|view| {
            let view = view.lock();
            view.leader.is_some() && !view.locked
        })
    }

    /// Next follower in round-robin order, or the leader if there are none
    pub fn handler(&self, shard: ShardId) -> Option<String> {
        let mut view = self.view(shard)?.lock();
        if view.followers.is_empty() {
            return view.leader.clone();
        }
        view.cursor = (view.cursor + 1) % view.followers.len();
        view.followers.values().nth(view.cursor).cloned()
    }
}

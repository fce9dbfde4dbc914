// In-process shard cluster: one keeper, in-memory SQLite per node, and a
// peer transport that calls the target node's handlers directly.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper::{CoordinationStore, Keeper, MemorySession};
use parking_lot::RwLock;
use tessel::{
    AckPolicy, Config, JoinOutcome, PeerClient, PeerError, ShardNode, SqlEngine, SqliteEngine,
    WriteKind,
};
use ts_core::protocol::{SqlBatchRequest, SqlRequest, TableDump, WriteAck};
use ts_core::{ChecksumDigest, ReplicaRole, ShardId, Value};

/// Routes peer calls to registered nodes; addresses marked down fail
#[derive(Default)]
pub struct LocalPeers {
    nodes: RwLock<HashMap<String, Arc<ShardNode>>>,
    down: RwLock<HashSet<String>>,
}

impl LocalPeers {
    pub fn register(&self, node: Arc<ShardNode>) {
        self.nodes.write().insert(node.address().to_string(), node);
    }

    pub fn set_down(&self, addr: &str, down: bool) {
        if down {
            self.down.write().insert(addr.to_string());
        } else {
            self.down.write().remove(addr);
        }
    }

    fn target(&self, addr: &str) -> Result<Arc<ShardNode>, PeerError> {
        if self.down.read().contains(addr) {
            return Err(PeerError::Transport(format!("{} is down", addr)));
        }
        self.nodes
            .read()
            .get(addr)
            .cloned()
            .ok_or_else(|| PeerError::Transport(format!("no route to {}", addr)))
    }
}

#[async_trait]
impl PeerClient for LocalPeers {
    async fn write(&self, addr: &str, kind: WriteKind, req: &SqlRequest) -> Result<WriteAck, PeerError> {
        let node = self.target(addr)?;
        Ok(node.handle_write(kind, req).await?)
    }

    async fn write_batch(&self, addr: &str, req: &SqlBatchRequest) -> Result<WriteAck, PeerError> {
        let node = self.target(addr)?;
        Ok(node.handle_batch(req).await?)
    }

    async fn vote(&self, addr: &str, req: &SqlRequest) -> Result<ChecksumDigest, PeerError> {
        let node = self.target(addr)?;
        Ok(node.handle_vote(req)?)
    }

    async fn dump(&self, addr: &str, table: &str) -> Result<Option<TableDump>, PeerError> {
        let node = self.target(addr)?;
        Ok(node.handle_dump(table)?)
    }
}

#[derive(Clone)]
pub struct TestClusterConfig {
    pub nodes: usize,
    pub max_shards: u32,
    pub max_followers: u32,
    pub ack_policy: AckPolicy,
}

impl Default for TestClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            max_shards: 1,
            max_followers: 2,
            ack_policy: AckPolicy::BestEffort,
        }
    }
}

pub struct TestCluster {
    pub keeper: Arc<Keeper>,
    pub peers: Arc<LocalPeers>,
    pub nodes: Vec<Arc<ShardNode>>,
    pub outcomes: Vec<JoinOutcome>,
    config: TestClusterConfig,
    stores: Vec<Arc<MemorySession>>,
}

impl TestCluster {
    /// Start the nodes one after another, so join order decides roles
    pub async fn start(config: TestClusterConfig) -> Self {
        let count = config.nodes;
        let mut cluster = Self {
            keeper: Arc::new(Keeper::new(Duration::from_secs(60))),
            peers: Arc::new(LocalPeers::default()),
            nodes: Vec::new(),
            outcomes: Vec::new(),
            config,
            stores: Vec::new(),
        };
        for _ in 0..count {
            cluster.add_node().await;
        }
        cluster
    }

    /// Start one more node; returns its index
    pub async fn add_node(&mut self) -> usize {
        let i = self.nodes.len();
        let mut node_config = Config::default();
        node_config.node.advertise_addr = format!("node{}:9090", i);
        node_config.cluster.max_shards = self.config.max_shards;
        node_config.cluster.max_followers = self.config.max_followers;
        node_config.replication.ack_policy = self.config.ack_policy;
        node_config.replication.ready_timeout_ms = 500;

        let store = Arc::new(MemorySession::open(self.keeper.clone()));
        let engine = Arc::new(SqliteEngine::open_in_memory().expect("open sqlite"));
        let node = Arc::new(ShardNode::new(
            &node_config,
            store.clone() as Arc<dyn CoordinationStore>,
            engine,
            self.peers.clone(),
        ));
        self.peers.register(node.clone());
        let (outcome, _watcher) = node.clone().start().await.expect("start node");
        self.outcomes.push(outcome);
        self.nodes.push(node);
        self.stores.push(store);
        i
    }

    pub fn addr(&self, i: usize) -> String {
        self.nodes[i].address().to_string()
    }

    pub fn node(&self, i: usize) -> &Arc<ShardNode> {
        &self.nodes[i]
    }

    pub fn session(&self, i: usize) -> u64 {
        self.stores[i].session_id()
    }

    pub fn leaders_of(&self, shard: ShardId) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| {
                n.membership().shard() == Some(shard)
                    && n.membership().role() == Some(ReplicaRole::Leader)
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, i: usize, table: &str) -> i64 {
        let rows = self.nodes[i]
            .engine()
            .query(&format!("SELECT COUNT(*) FROM {}", table))
            .expect("count")
            .rows;
        match rows[0][0] {
            Value::Integer(n) => n,
            ref other => panic!("unexpected count {:?}", other),
        }
    }

    pub fn checksum(&self, i: usize, table: &str) -> ChecksumDigest {
        self.nodes[i].engine().table_checksum(table).expect("checksum")
    }

    pub async fn write(&self, i: usize, kind: WriteKind, table: &str, sql: &str) -> WriteAck {
        self.nodes[i]
            .handle_write(kind, &SqlRequest::new(sql, table))
            .await
            .expect("write")
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

//! In-process coordination store
//!
//! Sessions are leases: each has a TTL and must be renewed with
//! [`Keeper::keepalive`]. The reaper expires lapsed sessions and removes their
//! ephemeral nodes. Every mutation is sequenced and kept in a bounded event
//! log so that remote clients can long-poll for changes.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::KeeperError;
use crate::protocol::{EventBatch, SequencedEvent};
use crate::store::{parent, validate_path, CoordinationStore, CreateMode, SessionId, WatchEvent};

/// Events retained for long-poll clients
pub const EVENT_LOG_CAPACITY: usize = 4096;

const BROADCAST_CAPACITY: usize = 1024;

struct ZNode {
    data: String,
    owner: Option<SessionId>,
}

struct Lease {
    ttl: Duration,
    expires_at: Instant,
}

struct KeeperState {
    nodes: BTreeMap<String, ZNode>,
    sessions: HashMap<SessionId, Lease>,
    next_session: SessionId,
    seq: u64,
    log: VecDeque<(u64, WatchEvent)>,
}

/// In-process coordination store
pub struct Keeper {
    state: Mutex<KeeperState>,
    events: broadcast::Sender<WatchEvent>,
    notify: Notify,
    default_ttl: Duration,
}

impl Keeper {
    pub fn new(default_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Mutex::new(KeeperState {
                nodes: BTreeMap::new(),
                sessions: HashMap::new(),
                next_session: 1,
                seq: 0,
                log: VecDeque::new(),
            }),
            events,
            notify: Notify::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // ==================== Sessions ====================

    pub fn open_session(&self, ttl: Option<Duration>) -> SessionId {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut state = self.state.lock();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(
            id,
            Lease {
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        debug!("Opened session {} (ttl {:?})", id, ttl);
        id
    }

    /// Renew a session's lease
    pub fn keepalive(&self, session: SessionId) -> Result<Duration, KeeperError> {
        let mut state = self.state.lock();
        let lease = state
            .sessions
            .get_mut(&session)
            .ok_or(KeeperError::SessionExpired(session))?;
        lease.expires_at = Instant::now() + lease.ttl;
        Ok(lease.ttl)
    }

    pub fn is_alive(&self, session: SessionId) -> bool {
        self.state.lock().sessions.contains_key(&session)
    }

    /// Close a session cleanly. Its ephemeral nodes are deleted.
    pub fn close_session(&self, session: SessionId) {
        self.end_session(session, false);
    }

    /// Expire a session immediately, as if its lease had lapsed
    pub fn expire_session(&self, session: SessionId) {
        self.end_session(session, true);
    }

    /// Expire every session whose lease has lapsed
    pub fn reap_expired(&self) -> Vec<SessionId> {
        let now = Instant::now();
        let lapsed: Vec<SessionId> = self
            .state
            .lock()
            .sessions
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for session in &lapsed {
            info!("Session {} lease lapsed", session);
            self.end_session(*session, true);
        }
        lapsed
    }

    /// Start the lease reaper
    pub fn start_reaper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.reap_expired();
            }
        })
    }

    fn end_session(&self, session: SessionId, expired: bool) {
        {
            let mut state = self.state.lock();
            if state.sessions.remove(&session).is_none() {
                return;
            }
            let owned: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.owner == Some(session))
                .map(|(path, _)| path.clone())
                .collect();
            for path in owned {
                if let Some(node) = state.nodes.remove(&path) {
                    self.record(
                        &mut state,
                        WatchEvent::NodeDeleted {
                            path,
                            data: node.data,
                        },
                    );
                }
            }
            if expired {
                self.record(&mut state, WatchEvent::SessionExpired { session });
            }
        }
        self.notify.notify_waiters();
    }

    // ==================== Nodes ====================

    pub fn create(
        &self,
        session: SessionId,
        path: &str,
        data: &str,
        mode: CreateMode,
    ) -> Result<(), KeeperError> {
        validate_path(path)?;
        {
            let mut state = self.state.lock();
            if mode == CreateMode::Ephemeral && !state.sessions.contains_key(&session) {
                return Err(KeeperError::SessionExpired(session));
            }
            if state.nodes.contains_key(path) {
                return Err(KeeperError::NodeExists(path.to_string()));
            }

            let mut missing = Vec::new();
            let mut cursor = parent(path);
            while let Some(ancestor) = cursor {
                if ancestor == "/" {
                    break;
                }
                match state.nodes.get(ancestor) {
                    Some(node) if node.owner.is_some() => {
                        return Err(KeeperError::InvalidPath(format!(
                            "{} has an ephemeral parent",
                            path
                        )));
                    }
                    Some(_) => break,
                    None => missing.push(ancestor.to_string()),
                }
                cursor = parent(ancestor);
            }
            for ancestor in missing.into_iter().rev() {
                state.nodes.insert(
                    ancestor.clone(),
                    ZNode {
                        data: String::new(),
                        owner: None,
                    },
                );
                self.record(
                    &mut state,
                    WatchEvent::NodeCreated {
                        path: ancestor,
                        data: String::new(),
                    },
                );
            }

            let owner = match mode {
                CreateMode::Persistent => None,
                CreateMode::Ephemeral => Some(session),
            };
            state.nodes.insert(
                path.to_string(),
                ZNode {
                    data: data.to_string(),
                    owner,
                },
            );
            self.record(
                &mut state,
                WatchEvent::NodeCreated {
                    path: path.to_string(),
                    data: data.to_string(),
                },
            );
        }
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn get(&self, path: &str) -> Result<Option<String>, KeeperError> {
        validate_path(path)?;
        Ok(self.state.lock().nodes.get(path).map(|n| n.data.clone()))
    }

    pub fn set(&self, path: &str, data: &str) -> Result<(), KeeperError> {
        validate_path(path)?;
        {
            let mut state = self.state.lock();
            let node = state
                .nodes
                .get_mut(path)
                .ok_or_else(|| KeeperError::NoNode(path.to_string()))?;
            node.data = data.to_string();
            self.record(
                &mut state,
                WatchEvent::DataChanged {
                    path: path.to_string(),
                    data: data.to_string(),
                },
            );
        }
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn delete(&self, path: &str) -> Result<(), KeeperError> {
        validate_path(path)?;
        {
            let mut state = self.state.lock();
            if !state.nodes.contains_key(path) {
                return Err(KeeperError::NoNode(path.to_string()));
            }
            if !Self::child_names(&state, path).is_empty() {
                return Err(KeeperError::NotEmpty(path.to_string()));
            }
            if let Some(node) = state.nodes.remove(path) {
                self.record(
                    &mut state,
                    WatchEvent::NodeDeleted {
                        path: path.to_string(),
                        data: node.data,
                    },
                );
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn children(&self, path: &str) -> Result<Vec<String>, KeeperError> {
        if path != "/" {
            validate_path(path)?;
        }
        let state = self.state.lock();
        Ok(Self::child_names(&state, path))
    }

    fn child_names(state: &KeeperState, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let rest = &p[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    // ==================== Events ====================

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Sequence number of the latest event
    pub fn current_seq(&self) -> u64 {
        self.state.lock().seq
    }

    /// Events after `since`. Sets `resync` when some were already dropped.
    pub fn events_since(&self, since: u64) -> EventBatch {
        let state = self.state.lock();
        let oldest = state.log.front().map(|(seq, _)| *seq).unwrap_or(state.seq + 1);
        if since > state.seq || (since < state.seq && since + 1 < oldest) {
            return EventBatch {
                events: Vec::new(),
                last_seq: state.seq,
                resync: true,
            };
        }
        EventBatch {
            events: state
                .log
                .iter()
                .filter(|(seq, _)| *seq > since)
                .map(|(seq, event)| SequencedEvent {
                    seq: *seq,
                    event: event.clone(),
                })
                .collect(),
            last_seq: state.seq,
            resync: false,
        }
    }

    /// Wait up to `timeout` for events after `since`
    pub async fn wait_events(&self, since: u64, timeout: Duration) -> EventBatch {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            let batch = self.events_since(since);
            if batch.resync || !batch.events.is_empty() {
                return batch;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.events_since(since);
            }
        }
    }

    /// Sequence, log and publish one event. Called with the state lock held so
    /// that broadcast order matches commit order.
    fn record(&self, state: &mut KeeperState, event: WatchEvent) {
        state.seq += 1;
        let seq = state.seq;
        state.log.push_back((seq, event.clone()));
        if state.log.len() > EVENT_LOG_CAPACITY {
            state.log.pop_front();
        }
        let _ = self.events.send(event);
    }
}

/// A session on an in-process [`Keeper`]
pub struct MemorySession {
    keeper: Arc<Keeper>,
    session: AtomicU64,
}

impl MemorySession {
    pub fn open(keeper: Arc<Keeper>) -> Self {
        let session = keeper.open_session(None);
        Self {
            keeper,
            session: AtomicU64::new(session),
        }
    }

    pub fn keeper(&self) -> &Arc<Keeper> {
        &self.keeper
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    fn session_id(&self) -> SessionId {
        self.session.load(Ordering::SeqCst)
    }

    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<(), KeeperError> {
        self.keeper.create(self.session_id(), path, data, mode)
    }

    async fn get(&self, path: &str) -> Result<Option<String>, KeeperError> {
        self.keeper.get(path)
    }

    async fn set(&self, path: &str, data: &str) -> Result<(), KeeperError> {
        self.keeper.set(path, data)
    }

    async fn delete(&self, path: &str) -> Result<(), KeeperError> {
        self.keeper.delete(path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, KeeperError> {
        self.keeper.children(path)
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.keeper.subscribe()
    }

    async fn reconnect(&self) -> Result<SessionId, KeeperError> {
        let session = self.keeper.open_session(None);
        self.session.store(session, Ordering::SeqCst);
        Ok(session)
    }

    async fn close(&self) -> Result<(), KeeperError> {
        self.keeper.close_session(self.session_id());
        Ok(())
    }
}

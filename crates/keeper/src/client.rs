//! Keeper HTTP client
//!
//! [`RemoteStore`] implements [`CoordinationStore`] against the `keeper`
//! service. Two background tasks keep it alive: a lease heartbeat and an event
//! long-poll that republishes remote changes on a local broadcast channel.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::KeeperError;
use crate::protocol::{
    ApiResponse, CreateNodeRequest, EventBatch, NodeData, OpenSessionRequest, SessionInfo,
    SetNodeRequest,
};
use crate::store::{CoordinationStore, CreateMode, SessionId, WatchEvent};

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStoreConfig {
    /// Keeper service base URLs, tried in order when opening a session
    #[serde(default = "default_addrs")]
    pub addrs: Vec<String>,
    /// Session lease TTL in milliseconds
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,
    /// Lease renewal interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Long-poll wait in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_addrs() -> Vec<String> {
    vec!["http://127.0.0.1:2181".to_string()]
}

fn default_session_ttl_ms() -> u64 {
    6000
}

fn default_heartbeat_interval_ms() -> u64 {
    2000
}

fn default_poll_timeout_ms() -> u64 {
    10000
}

fn default_request_timeout_ms() -> u64 {
    3000
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            addrs: default_addrs(),
            session_ttl_ms: default_session_ttl_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Coordination store backed by the keeper service
pub struct RemoteStore {
    config: RemoteStoreConfig,
    http: reqwest::Client,
    /// Index into `config.addrs` of the keeper holding our session
    active: AtomicUsize,
    /// Event log position on the active keeper
    cursor: AtomicU64,
    session: AtomicU64,
    /// Last session reported as expired, so loss is announced once
    reported_expired: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RemoteStore {
    /// Open a session and start the heartbeat and event-poll tasks
    pub async fn connect(config: RemoteStoreConfig) -> Result<Arc<Self>, KeeperError> {
        if config.addrs.is_empty() {
            return Err(KeeperError::Api("no keeper address configured".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let (events, _) = broadcast::channel(1024);

        let store = Arc::new(Self {
            config,
            http,
            active: AtomicUsize::new(0),
            cursor: AtomicU64::new(0),
            session: AtomicU64::new(0),
            reported_expired: AtomicU64::new(0),
            events,
            tasks: Mutex::new(Vec::new()),
        });
        let info = store.open_session().await?;
        info!(
            "Connected to keeper {} (session {}, ttl {}ms)",
            store.active_addr(),
            info.session_id,
            info.ttl_ms
        );

        let heartbeat = store.clone().start_heartbeat();
        let poller = store.clone().start_event_poll();
        store.tasks.lock().extend([heartbeat, poller]);
        Ok(store)
    }

    /// Base URL of the keeper holding our session
    pub fn active_addr(&self) -> &str {
        let addrs = &self.config.addrs;
        addrs
            .get(self.active.load(Ordering::SeqCst) % addrs.len().max(1))
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.active_addr().trim_end_matches('/'), path)
    }

    /// Open a session on the first reachable keeper, starting from the
    /// current one. Only transport failures move on to the next address.
    async fn open_session(&self) -> Result<SessionInfo, KeeperError> {
        let req = OpenSessionRequest {
            ttl_ms: Some(self.config.session_ttl_ms),
        };
        let count = self.config.addrs.len();
        let first = self.active.load(Ordering::SeqCst);
        let mut last_error = KeeperError::Api("no keeper address configured".to_string());
        for step in 0..count {
            let index = (first + step) % count;
            let base = self.config.addrs[index].trim_end_matches('/');
            let result = self
                .call::<SessionInfo>(self.http.post(format!("{}/v1/sessions", base)).json(&req))
                .await;
            match result {
                Ok(Some(info)) => {
                    let switched = self.active.swap(index, Ordering::SeqCst) != index;
                    self.session.store(info.session_id, Ordering::SeqCst);
                    if switched || self.cursor.load(Ordering::SeqCst) == 0 {
                        // another keeper has its own event log
                        self.cursor.store(info.event_seq, Ordering::SeqCst);
                        if switched {
                            let _ = self.events.send(WatchEvent::Resync);
                        }
                    }
                    return Ok(info);
                }
                Ok(None) => return Err(KeeperError::Api("missing session info".to_string())),
                Err(e @ KeeperError::Transport(_)) => {
                    warn!("Keeper {} unreachable: {}", base, e);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>, KeeperError> {
        let response: ApiResponse<T> = request.send().await?.json().await?;
        response.into_result(self.session_id())
    }

    fn report_expired(&self, session: SessionId) {
        if self.reported_expired.swap(session, Ordering::SeqCst) != session {
            warn!("Keeper session {} expired", session);
            let _ = self.events.send(WatchEvent::SessionExpired { session });
        }
    }

    /// Renew the lease every heartbeat interval
    fn start_heartbeat(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(self.config.heartbeat_interval_ms));
            loop {
                ticker.tick().await;
                let session = self.session_id();
                if self.reported_expired.load(Ordering::SeqCst) == session {
                    continue;
                }
                let url = self.url(&format!("/v1/sessions/{}/keepalive", session));
                match self.call::<u64>(self.http.post(url)).await {
                    Ok(_) => debug!("Renewed keeper session {}", session),
                    Err(KeeperError::SessionExpired(_)) => self.report_expired(session),
                    Err(e) => warn!("Keeper heartbeat failed: {}", e),
                }
            }
        })
    }

    /// Long-poll the event log and republish locally
    fn start_event_poll(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let wait = Duration::from_millis(self.config.poll_timeout_ms);
            let slack = Duration::from_millis(self.config.request_timeout_ms);
            loop {
                let cursor = self.cursor.load(Ordering::SeqCst);
                let request = self
                    .http
                    .get(self.url("/v1/events"))
                    .query(&[
                        ("since", cursor.to_string()),
                        ("timeoutMs", self.config.poll_timeout_ms.to_string()),
                    ])
                    .timeout(wait + slack);
                match self.call::<EventBatch>(request).await {
                    Ok(Some(batch)) => {
                        if batch.resync {
                            warn!("Keeper event cursor {} is stale, resyncing", cursor);
                            let _ = self.events.send(WatchEvent::Resync);
                        }
                        for sequenced in batch.events {
                            if let WatchEvent::SessionExpired { session } = sequenced.event {
                                if session == self.session_id() {
                                    self.report_expired(session);
                                    continue;
                                }
                            }
                            let _ = self.events.send(sequenced.event);
                        }
                        let _ = self.cursor.compare_exchange(
                            cursor,
                            batch.last_seq,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Keeper event poll failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CoordinationStore for RemoteStore {
    fn session_id(&self) -> SessionId {
        self.session.load(Ordering::SeqCst)
    }

    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<(), KeeperError> {
        let req = CreateNodeRequest {
            path: path.to_string(),
            data: data.to_string(),
            mode,
            session_id: self.session_id(),
        };
        self.call::<()>(self.http.post(self.url("/v1/nodes")).json(&req))
            .await
            .map(|_| ())
    }

    async fn get(&self, path: &str) -> Result<Option<String>, KeeperError> {
        let node: Option<NodeData> = self
            .call(self.http.get(self.url("/v1/nodes")).query(&[("path", path)]))
            .await?;
        Ok(node.and_then(|n| n.data))
    }

    async fn set(&self, path: &str, data: &str) -> Result<(), KeeperError> {
        let req = SetNodeRequest {
            path: path.to_string(),
            data: data.to_string(),
        };
        self.call::<()>(self.http.put(self.url("/v1/nodes")).json(&req))
            .await
            .map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<(), KeeperError> {
        self.call::<()>(self.http.delete(self.url("/v1/nodes")).query(&[("path", path)]))
            .await
            .map(|_| ())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, KeeperError> {
        let children: Option<Vec<String>> = self
            .call(self.http.get(self.url("/v1/children")).query(&[("path", path)]))
            .await?;
        Ok(children.unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    async fn reconnect(&self) -> Result<SessionId, KeeperError> {
        let info = self.open_session().await?;
        info!(
            "Reconnected to keeper {} with session {}",
            self.active_addr(),
            info.session_id
        );
        Ok(info.session_id)
    }

    async fn close(&self) -> Result<(), KeeperError> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let url = self.url(&format!("/v1/sessions/{}", self.session_id()));
        self.call::<()>(self.http.delete(url)).await.map(|_| ())
    }
}

//! The coordination store interface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::KeeperError;

pub type SessionId = u64;

/// Node lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateMode {
    /// Lives until deleted
    Persistent,
    /// Removed when the creating session ends
    Ephemeral,
}

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WatchEvent {
    NodeCreated { path: String, data: String },
    DataChanged { path: String, data: String },
    /// `data` is the last value the node held
    NodeDeleted { path: String, data: String },
    SessionExpired { session: SessionId },
    /// Events were missed; subscribers must re-read the state they mirror
    Resync,
}

impl WatchEvent {
    pub fn path(&self) -> Option<&str> {
        match self {
            WatchEvent::NodeCreated { path, .. }
            | WatchEvent::DataChanged { path, .. }
            | WatchEvent::NodeDeleted { path, .. } => Some(path),
            WatchEvent::SessionExpired { .. } | WatchEvent::Resync => None,
        }
    }
}

/// Hierarchical store with ephemeral nodes and watches.
///
/// `create` is the single point of atomicity: of many concurrent creators of
/// one path exactly one succeeds, the rest get [`KeeperError::NodeExists`].
/// Missing parents are created as persistent nodes.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Current session. Changes after [`reconnect`](Self::reconnect).
    fn session_id(&self) -> SessionId;

    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<(), KeeperError>;

    /// Node data, `None` when absent
    async fn get(&self, path: &str) -> Result<Option<String>, KeeperError>;

    async fn exists(&self, path: &str) -> Result<bool, KeeperError> {
        Ok(self.get(path).await?.is_some())
    }

    async fn set(&self, path: &str, data: &str) -> Result<(), KeeperError>;

    async fn delete(&self, path: &str) -> Result<(), KeeperError>;

    /// Child names in lexical order; empty when `path` is absent
    async fn children(&self, path: &str) -> Result<Vec<String>, KeeperError>;

    /// Every change in the namespace, in commit order
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;

    /// Open a fresh session after the current one was lost
    async fn reconnect(&self) -> Result<SessionId, KeeperError>;

    /// End the session, removing its ephemeral nodes
    async fn close(&self) -> Result<(), KeeperError>;
}

/// Join a parent path and a child name
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent path, `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

pub fn validate_path(path: &str) -> Result<(), KeeperError> {
    let valid = path.len() > 1
        && path.starts_with('/')
        && !path.ends_with('/')
        && !path.contains("//");
    if valid {
        Ok(())
    } else {
        Err(KeeperError::InvalidPath(path.to_string()))
    }
}

/// Create a persistent node unless it already exists
pub async fn ensure_path<S>(store: &S, path: &str) -> Result<(), KeeperError>
where
    S: CoordinationStore + ?Sized,
{
    match store.create(path, "", CreateMode::Persistent).await {
        Ok(()) | Err(KeeperError::NodeExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Set a persistent node's data, creating it if needed
pub async fn upsert<S>(store: &S, path: &str, data: &str) -> Result<(), KeeperError>
where
    S: CoordinationStore + ?Sized,
{
    match store.set(path, data).await {
        Err(KeeperError::NoNode(_)) => match store.create(path, data, CreateMode::Persistent).await {
            Err(KeeperError::NodeExists(_)) => store.set(path, data).await,
            other => other,
        },
        other => other,
    }
}

/// Delete a node, returning whether it existed
pub async fn delete_if_exists<S>(store: &S, path: &str) -> Result<bool, KeeperError>
where
    S: CoordinationStore + ?Sized,
{
    match store.delete(path).await {
        Ok(()) => Ok(true),
        Err(KeeperError::NoNode(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete a node and its whole subtree
pub async fn delete_recursive<S>(store: &S, path: &str) -> Result<(), KeeperError>
where
    S: CoordinationStore + ?Sized,
{
    let mut stack = vec![path.to_string()];
    let mut order = Vec::new();
    while let Some(current) = stack.pop() {
        for child in store.children(&current).await? {
            stack.push(join(&current, &child));
        }
        order.push(current);
    }
    for node in order.into_iter().rev() {
        delete_if_exists(store, &node).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");

        assert!(validate_path("/a/b").is_ok());
        assert!(validate_path("/").is_err());
        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a//b").is_err());
        assert!(validate_path("/a/").is_err());
    }

    #[test]
    fn test_event_json() {
        let event = WatchEvent::NodeDeleted {
            path: "/x".into(),
            data: "d".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "nodeDeleted");
        assert_eq!(event.path(), Some("/x"));
        assert_eq!(WatchEvent::Resync.path(), None);
    }
}

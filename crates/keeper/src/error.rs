use ts_core::ClusterError;

use crate::store::SessionId;

/// Coordination store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeeperError {
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("node does not exist: {0}")]
    NoNode(String),
    #[error("node has children: {0}")]
    NotEmpty(String),
    #[error("session {0} expired")]
    SessionExpired(SessionId),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("keeper error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for KeeperError {
    fn from(err: reqwest::Error) -> Self {
        KeeperError::Transport(err.to_string())
    }
}

impl From<KeeperError> for ClusterError {
    fn from(err: KeeperError) -> Self {
        match err {
            KeeperError::SessionExpired(session) => {
                ClusterError::CoordinationSessionLoss(format!("session {} expired", session))
            }
            other => ClusterError::Coordination(other.to_string()),
        }
    }
}

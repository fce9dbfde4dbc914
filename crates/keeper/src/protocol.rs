//! Keeper HTTP wire types

use serde::{Deserialize, Serialize};

use crate::error::KeeperError;
use crate::store::{CreateMode, SessionId, WatchEvent};

/// `{success, data, error}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<Fault>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(err: &KeeperError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(Fault::from(err)),
        }
    }

    /// Convert back into a typed result. `session` names the caller's session
    /// for [`KeeperError::SessionExpired`].
    pub fn into_result(self, session: SessionId) -> Result<Option<T>, KeeperError> {
        match self.error {
            Some(fault) if !self.success => Err(fault.into_error(session)),
            _ => Ok(self.data),
        }
    }
}

impl<T> From<Result<T, KeeperError>> for ApiResponse<T> {
    fn from(result: Result<T, KeeperError>) -> Self {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::err(&e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultKind {
    NodeExists,
    NoNode,
    NotEmpty,
    SessionExpired,
    InvalidPath,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    /// Path or session the fault refers to
    pub subject: String,
}

impl From<&KeeperError> for Fault {
    fn from(err: &KeeperError) -> Self {
        let (kind, subject) = match err {
            KeeperError::NodeExists(p) => (FaultKind::NodeExists, p.clone()),
            KeeperError::NoNode(p) => (FaultKind::NoNode, p.clone()),
            KeeperError::NotEmpty(p) => (FaultKind::NotEmpty, p.clone()),
            KeeperError::SessionExpired(s) => (FaultKind::SessionExpired, s.to_string()),
            KeeperError::InvalidPath(p) => (FaultKind::InvalidPath, p.clone()),
            KeeperError::Transport(m) | KeeperError::Api(m) => (FaultKind::Internal, m.clone()),
        };
        Self {
            kind,
            message: err.to_string(),
            subject,
        }
    }
}

impl Fault {
    pub fn into_error(self, session: SessionId) -> KeeperError {
        match self.kind {
            FaultKind::NodeExists => KeeperError::NodeExists(self.subject),
            FaultKind::NoNode => KeeperError::NoNode(self.subject),
            FaultKind::NotEmpty => KeeperError::NotEmpty(self.subject),
            FaultKind::SessionExpired => {
                KeeperError::SessionExpired(self.subject.parse().unwrap_or(session))
            }
            FaultKind::InvalidPath => KeeperError::InvalidPath(self.subject),
            FaultKind::Internal => KeeperError::Api(self.message),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionRequest {
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub ttl_ms: u64,
    /// Event sequence at session open; clients poll from here
    pub event_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    pub path: String,
    #[serde(default)]
    pub data: String,
    pub mode: CreateMode,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetNodeRequest {
    pub path: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub since: u64,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: WatchEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub events: Vec<SequencedEvent>,
    pub last_seq: u64,
    pub resync: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_round_trip() {
        for err in [
            KeeperError::NodeExists("/a".into()),
            KeeperError::NoNode("/b".into()),
            KeeperError::NotEmpty("/c".into()),
            KeeperError::SessionExpired(7),
            KeeperError::InvalidPath("x".into()),
        ] {
            let response: ApiResponse<()> = ApiResponse::err(&err);
            let json = serde_json::to_string(&response).unwrap();
            let back: ApiResponse<()> = serde_json::from_str(&json).unwrap();
            assert_eq!(back.into_result(99).unwrap_err(), err);
        }
    }
}

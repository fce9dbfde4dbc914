//! Node-to-node calls
//!
//! Forwarded writes, vote queries and table dumps all go through
//! [`PeerClient`], so the in-process test cluster can swap the transport.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use ts_core::protocol::{SqlBatchRequest, SqlRequest, TableDump, TableRequest, VoteResponse, WriteAck};
use ts_core::{ApiResult, ChecksumDigest, ClusterError, StatusCode};

use crate::replication::WriteKind;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rejected with {}: {message}", .status.code())]
    Rejected { status: StatusCode, message: String },
    #[error("reply carried no data")]
    Empty,
}

impl PeerError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            PeerError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn into_cluster_error(self, addr: &str) -> ClusterError {
        match self {
            PeerError::Rejected { status, message } => ClusterError::from_status(status, message),
            other => ClusterError::Peer {
                addr: addr.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for PeerError {
    fn from(err: reqwest::Error) -> Self {
        PeerError::Transport(err.to_string())
    }
}

impl From<ClusterError> for PeerError {
    fn from(err: ClusterError) -> Self {
        PeerError::Rejected {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn write(&self, addr: &str, kind: WriteKind, req: &SqlRequest) -> Result<WriteAck, PeerError>;

    async fn write_batch(&self, addr: &str, req: &SqlBatchRequest) -> Result<WriteAck, PeerError>;

    /// The replica's checksum for a query
    async fn vote(&self, addr: &str, req: &SqlRequest) -> Result<ChecksumDigest, PeerError>;

    /// Full copy of a table, `None` if the peer does not have it
    async fn dump(&self, addr: &str, table: &str) -> Result<Option<TableDump>, PeerError>;
}

/// HTTP transport
pub struct HttpPeerClient {
    http: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, PeerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn post<B, T>(&self, addr: &str, endpoint: &str, body: &B) -> Result<Option<T>, PeerError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("http://{}/{}", addr, endpoint);
        let reply: ApiResult<T> = self.http.post(url).json(body).send().await?.json().await?;
        reply
            .into_result()
            .map_err(|(status, message)| PeerError::Rejected { status, message })
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn write(&self, addr: &str, kind: WriteKind, req: &SqlRequest) -> Result<WriteAck, PeerError> {
        self.post(addr, kind.endpoint(), req).await?.ok_or(PeerError::Empty)
    }

    async fn write_batch(&self, addr: &str, req: &SqlBatchRequest) -> Result<WriteAck, PeerError> {
        self.post(addr, "updateBatch", req).await?.ok_or(PeerError::Empty)
    }

    async fn vote(&self, addr: &str, req: &SqlRequest) -> Result<ChecksumDigest, PeerError> {
        let vote: VoteResponse = self.post(addr, "votequery", req).await?.ok_or(PeerError::Empty)?;
        Ok(vote.checksum)
    }

    async fn dump(&self, addr: &str, table: &str) -> Result<Option<TableDump>, PeerError> {
        let req = TableRequest {
            table_name: table.to_string(),
        };
        self.post(addr, "dump", &req).await
    }
}

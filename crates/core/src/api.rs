//! Response envelope shared by every HTTP surface
//!
//! Every response carries an explicit `status`/`message`; transport-level
//! status codes are always 200.

use serde::{Deserialize, Serialize};

/// Application status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Failed,
    TableExists,
    TableNotExist,
    QuorumFailure,
    NoWritableShard,
    KeyOutOfPartition,
    ChecksumMismatch,
    MigrationPartialFailure,
    NotReady,
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Failed => 500,
            StatusCode::TableExists => 601,
            StatusCode::TableNotExist => 602,
            StatusCode::QuorumFailure => 603,
            StatusCode::NoWritableShard => 604,
            StatusCode::KeyOutOfPartition => 605,
            StatusCode::ChecksumMismatch => 606,
            StatusCode::MigrationPartialFailure => 607,
            StatusCode::NotReady => 608,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            601 => StatusCode::TableExists,
            602 => StatusCode::TableNotExist,
            603 => StatusCode::QuorumFailure,
            604 => StatusCode::NoWritableShard,
            605 => StatusCode::KeyOutOfPartition,
            606 => StatusCode::ChecksumMismatch,
            607 => StatusCode::MigrationPartialFailure,
            608 => StatusCode::NotReady,
            _ => StatusCode::Failed,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Failed => "FAILED",
            StatusCode::TableExists => "TABLE_EXIST",
            StatusCode::TableNotExist => "TABLE_NOT_EXIST",
            StatusCode::QuorumFailure => "QUORUM_FAILURE",
            StatusCode::NoWritableShard => "NO_WRITABLE_SHARD",
            StatusCode::KeyOutOfPartition => "KEY_OUT_OF_PARTITION",
            StatusCode::ChecksumMismatch => "CHECKSUM_MISMATCH",
            StatusCode::MigrationPartialFailure => "MIGRATION_PARTIAL_FAILURE",
            StatusCode::NotReady => "NOT_READY",
        }
    }
}

/// `{status, message, data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResult<T> {
    pub status: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::Ok.code(),
            message: StatusCode::Ok.default_message().to_string(),
            data: Some(data),
        }
    }

    pub fn err(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Error envelope carrying a partial payload
    pub fn err_with(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            status: status.code(),
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_code(self.status)
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok.code()
    }

    /// Split into payload or `(status, message)`
    pub fn into_result(self) -> Result<Option<T>, (StatusCode, String)> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err((self.status_code(), self.message))
        }
    }
}

impl<T> From<crate::error::ClusterError> for ApiResult<T> {
    fn from(err: crate::error::ClusterError) -> Self {
        ApiResult::err(err.status(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for status in [
            StatusCode::Ok,
            StatusCode::TableExists,
            StatusCode::TableNotExist,
            StatusCode::QuorumFailure,
            StatusCode::NotReady,
        ] {
            assert_eq!(StatusCode::from_code(status.code()), status);
        }
        assert_eq!(StatusCode::from_code(404), StatusCode::Failed);
    }

    #[test]
    fn test_envelope_json() {
        let ok = serde_json::to_value(ApiResult::ok(3u32)).unwrap();
        assert_eq!(ok["status"], 200);
        assert_eq!(ok["message"], "OK");
        assert_eq!(ok["data"], 3);

        let err: ApiResult<u32> =
            serde_json::from_str(r#"{"status": 601, "message": "TABLE_EXIST"}"#).unwrap();
        assert_eq!(err.status_code(), StatusCode::TableExists);
        assert!(err.data.is_none());
        assert!(err.into_result().is_err());
    }
}

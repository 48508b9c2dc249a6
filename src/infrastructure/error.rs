use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 远端拉取错误，整个同步周期放弃
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {message}")]
    Network { message: String, url: Option<String> },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("unparsable payload: {message}")]
    Payload { message: String },

    #[error("invalid endpoint: {message}")]
    InvalidEndpoint { message: String },
}

impl FetchError {
    pub fn network(message: impl Into<String>, url: Option<String>) -> Self {
        FetchError::Network {
            message: message.into(),
            url,
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        FetchError::Payload {
            message: message.into(),
        }
    }
}

/// 单条记录的字段解码问题，只会降级为默认值，不会中断批次
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeError {
    #[error("field `{field}` missing or not a string")]
    MissingField { field: String },

    #[error("unparsable date `{value}`")]
    InvalidDate { value: String },
}

/// 合并策略拒绝合并
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("merge refused for commit {sha}: {reason}")]
pub struct ConflictError {
    pub sha: String,
    pub reason: String,
}

impl ConflictError {
    pub fn new(sha: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            sha: sha.into(),
            reason: reason.into(),
        }
    }
}

/// 存储错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {message}")]
    Database { message: String },

    #[error("constraint violation: {message}")]
    Constraint { message: String },

    #[error("commit {sha} not found")]
    NotFound { sha: String },

    #[error("corrupt row: {message}")]
    Corrupt { message: String },

    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

impl StoreError {
    pub fn database(message: impl Into<String>) -> Self {
        StoreError::Database {
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        StoreError::Constraint {
            message: message.into(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        StoreError::Corrupt {
            message: message.into(),
        }
    }
}

/// 同步周期错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("a sync cycle is already in progress")]
    AlreadyRunning,

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// 下一次触发时是否值得重试
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::AlreadyRunning => true,
            SyncError::Fetch(FetchError::InvalidEndpoint { .. }) => false,
            SyncError::Fetch(_) => true,
            SyncError::Store(StoreError::Database { .. }) => true,
            SyncError::Store(_) => false,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SyncError::AlreadyRunning => ErrorSeverity::Low,
            SyncError::Fetch(FetchError::InvalidEndpoint { .. }) => ErrorSeverity::High,
            SyncError::Fetch(_) => ErrorSeverity::Medium,
            SyncError::Store(StoreError::Corrupt { .. }) => ErrorSeverity::Critical,
            SyncError::Store(_) => ErrorSeverity::High,
        }
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return FetchError::payload(error.to_string());
        }
        if let Some(status) = error.status() {
            return FetchError::Status {
                status: status.as_u16(),
                url: error.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        FetchError::Network {
            message: error.to_string(),
            url: error.url().map(|u| u.to_string()),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(error: serde_json::Error) -> Self {
        FetchError::payload(error.to_string())
    }
}

impl From<url::ParseError> for FetchError {
    fn from(error: url::ParseError) -> Self {
        FetchError::InvalidEndpoint {
            message: error.to_string(),
        }
    }
}

impl From<uuid::Error> for StoreError {
    fn from(error: uuid::Error) -> Self {
        StoreError::corrupt(format!("invalid author id: {}", error))
    }
}

impl From<chrono::ParseError> for StoreError {
    fn from(error: chrono::ParseError) -> Self {
        StoreError::corrupt(format!("invalid stored date: {}", error))
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &error {
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => StoreError::constraint(db.message()),
                _ => StoreError::database(error.to_string()),
            },
            _ => StoreError::database(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_classification() {
        let fetch = SyncError::from(FetchError::Status {
            status: 503,
            url: "http://example.com".to_string(),
        });
        assert!(fetch.is_retryable());
        assert_eq!(fetch.severity(), ErrorSeverity::Medium);

        let conflict = SyncError::from(StoreError::from(ConflictError::new("a1", "message differs")));
        assert!(!conflict.is_retryable());
        assert_eq!(conflict.severity(), ErrorSeverity::High);

        assert!(SyncError::AlreadyRunning.is_retryable());
    }

    #[test]
    fn test_conflict_error_display() {
        let err = StoreError::from(ConflictError::new("a1", "message differs"));
        assert_eq!(err.to_string(), "merge refused for commit a1: message differs");
    }

    #[test]
    fn test_url_parse_error_is_invalid_endpoint() {
        let err: FetchError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, FetchError::InvalidEndpoint { .. }));
    }
}

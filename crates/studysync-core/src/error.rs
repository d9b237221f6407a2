//! Error types.
//!
//! エラーは層ごとに分ける:
//! - `StoreError`: ローカル DB（SQLite）の失敗
//! - `ApiError`: リモート API 呼び出しの失敗（型付き）
//! - `RecordError`: リモートから届いた 1 レコードの decode 失敗
//! - `TaskError`: タスク実行境界で扱うエラー（Api / Store / payload）
//! - `ConfigError`: 設定ファイルの読み込み失敗
//! - `SyncError`: エンジン外に返すトップレベルのエラー

use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("database lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            detail: detail.into(),
        }
    }
}

/// Typed failure signal of the network collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Credentials are missing, invalid or expired.
    #[error("credentials rejected: {0}")]
    Unauthorized(String),

    /// The server asked us to slow down.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Timeout, connection failure, 5xx.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Anything retrying will not fix (4xx other than 401/429, undecodable page).
    #[error("fatal api error: {0}")]
    Fatal(String),
}

impl ApiError {
    /// Is it worth keeping the task queued and trying again later?
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Transient(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected object type '{found}', expected one of {expected:?}")]
    UnexpectedObject {
        expected: &'static [&'static str],
        found: String,
    },

    #[error("{object} record without id")]
    MissingId { object: String },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("handler not found for kind={0}")]
    HandlerNotFound(TaskKind),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Other(String),
}

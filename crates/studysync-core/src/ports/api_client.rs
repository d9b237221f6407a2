//! ApiClient port - リモート API への唯一の入口
//!
//! 1 回の呼び出し = 1 ページ。続きがあれば `Page::next` に次の URL が入る。
//! 失敗は `ApiError` で型付きに返す（401 / 429 / transient / fatal）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ApiError;

/// One page request.
///
/// `next_url` が入っている場合はそれをそのまま使い、他のフィールドは無視してよい。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Resource path, e.g. `/assignments`.
    pub path: String,

    /// Only records updated after this instant.
    pub updated_after: Option<DateTime<Utc>>,

    /// Restrict a collection to these record ids.
    pub ids: Vec<i64>,

    /// Continuation URL from the previous page.
    pub next_url: Option<String>,
}

impl PageRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn updated_after(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.updated_after = at;
        self
    }

    pub fn ids(mut self, ids: Vec<i64>) -> Self {
        self.ids = ids;
        self
    }

    /// Request for the page after `next_url`.
    pub fn continue_at(&self, next_url: String) -> Self {
        Self {
            next_url: Some(next_url),
            ..self.clone()
        }
    }
}

/// Decoded page. Singular resources come back as a one-record page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub next: Option<String>,
}

impl Page {
    pub fn last(records: Vec<Value>) -> Self {
        Self { records, next: None }
    }
}

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<Page, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_keeps_the_original_filters() {
        let req = PageRequest::new("/subjects").ids(vec![1, 2]);
        let next = req.continue_at("https://example.test/subjects?page_after_id=2".into());
        assert_eq!(next.path, "/subjects");
        assert_eq!(next.ids, vec![1, 2]);
        assert!(next.next_url.is_some());
    }
}

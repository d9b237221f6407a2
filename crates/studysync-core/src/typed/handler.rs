//! TaskHandler - 1 つの task kind を実行する handler
//!
//! # 学習ポイント
//! - ジェネリックな `ResourceHandler<D>` を object-safe な `dyn TaskHandler` に型消去
//! - ページ単位でトランザクションを切る（upsert は冪等なので途中失敗しても再実行で揃う）
//! - 壊れたレコードは warn ログを出してスキップ（タスク全体は止めない）

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::{debug, warn};

use super::record::{RecordData, Resource};
use crate::domain::{TaskDefinition, TaskKind};
use crate::error::{ApiError, TaskError};
use crate::ports::{ApiClient, Clock, PageRequest};
use crate::store::{Database, Properties};

/// Records written per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub applied: usize,
    pub skipped: usize,
}

/// Collaborators a handler runs against.
#[derive(Clone)]
pub struct TaskContext {
    pub db: Arc<Database>,
    pub api: Arc<dyn ApiClient>,
    pub clock: Arc<dyn Clock>,
    /// Upper bound for one page request.
    pub request_timeout: Duration,
}

/// Overlap applied to the "updated after" cursor.
pub const CURSOR_OVERLAP: TimeDelta = TimeDelta::hours(1);

#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Fetch every page and upsert it. Bookkeeping of the definition and the
    /// sync state is left to the caller.
    async fn run(&self, ctx: &TaskContext, task: &TaskDefinition) -> Result<Applied, TaskError>;
}

/// Handler for one resource whose records decode into `D`.
pub struct ResourceHandler<D: RecordData> {
    kind: TaskKind,
    _marker: PhantomData<fn() -> D>,
}

impl<D: RecordData> ResourceHandler<D> {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            _marker: PhantomData,
        }
    }

    fn first_request(&self, ctx: &TaskContext, task: &TaskDefinition) -> Result<PageRequest, TaskError> {
        let resource = self.kind.resource();
        let request = PageRequest::new(resource.path());
        if self.kind.is_parameterized() {
            return Ok(request.ids(parse_ids(&task.data)?));
        }
        if !resource.is_collection() {
            return Ok(request);
        }
        let last = ctx
            .db
            .with_conn(|conn| Properties::last_sync_success(conn, resource))?;
        Ok(request.updated_after(last.map(|t| t - CURSOR_OVERLAP)))
    }
}

#[async_trait]
impl<D: RecordData> TaskHandler for ResourceHandler<D> {
    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn run(&self, ctx: &TaskContext, task: &TaskDefinition) -> Result<Applied, TaskError> {
        let mut request = self.first_request(ctx, task)?;
        let mut total = Applied::default();

        loop {
            let page = tokio::time::timeout(ctx.request_timeout, ctx.api.fetch(&request))
                .await
                .map_err(|_| ApiError::Transient("request timed out".to_string()))??;

            let applied = ctx.db.transaction(|conn| {
                let mut applied = Applied::default();
                for value in page.records {
                    match Resource::<D>::decode(value) {
                        Ok(record) => {
                            D::apply(conn, &record)?;
                            applied.applied += 1;
                        }
                        Err(e) => {
                            warn!(kind = %self.kind, error = %e, "skipping malformed record");
                            applied.skipped += 1;
                        }
                    }
                }
                Ok(applied)
            })?;
            total.applied += applied.applied;
            total.skipped += applied.skipped;
            debug!(
                kind = %self.kind,
                applied = applied.applied,
                skipped = applied.skipped,
                "page applied"
            );

            match page.next {
                Some(next) if request.next_url.as_deref() != Some(next.as_str()) => {
                    request = request.continue_at(next);
                }
                _ => break,
            }
        }
        Ok(total)
    }
}

/// `"1,2, 3"` -> `[1, 2, 3]`
pub fn parse_ids(data: &str) -> Result<Vec<i64>, TaskError> {
    let ids = data
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|e| TaskError::InvalidPayload(format!("subject id '{s}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(TaskError::InvalidPayload("no subject ids".to_string()));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResourceKind, TaskId};
    use crate::ports::{FixedClock, Page};
    use crate::store::SubjectRepository;
    use crate::testing::{FakeApiClient, record};
    use crate::typed::record::{AssignmentData, SubjectData};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn ctx(api: Arc<FakeApiClient>) -> TaskContext {
        TaskContext {
            db: Arc::new(Database::open_in_memory().unwrap()),
            api,
            clock: Arc::new(FixedClock::new(now())),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn task(kind: TaskKind, data: &str) -> TaskDefinition {
        TaskDefinition {
            id: TaskId::from_ulid(Ulid::new()),
            kind,
            data: data.to_string(),
            seq: 1,
            queued_at: now(),
        }
    }

    fn assignment(id: i64, subject_id: i64) -> serde_json::Value {
        record(
            id,
            "assignment",
            json!({"subject_id": subject_id, "subject_type": "kanji", "srs_stage": 1}),
        )
    }

    #[test]
    fn ids_payload_parsing() {
        assert_eq!(parse_ids("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert!(matches!(parse_ids(""), Err(TaskError::InvalidPayload(_))));
        assert!(matches!(parse_ids("1,x"), Err(TaskError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn follows_pages_and_skips_bad_records() {
        let api = Arc::new(FakeApiClient::new());
        api.push_page(
            "/assignments",
            Page {
                records: vec![assignment(1, 10), json!({"object": "assignment"})],
                next: Some("page-2".to_string()),
            },
        );
        api.push_page("/assignments", Page::last(vec![assignment(2, 20)]));
        let ctx = ctx(api.clone());

        let handler = ResourceHandler::<AssignmentData>::new(TaskKind::GetAssignments);
        let applied = handler
            .run(&ctx, &task(TaskKind::GetAssignments, ""))
            .await
            .unwrap();

        assert_eq!(applied, Applied { applied: 2, skipped: 1 });
        assert_eq!(api.calls().len(), 2);
        assert_eq!(api.calls()[1].next_url.as_deref(), Some("page-2"));
        let count = ctx.db.with_conn(SubjectRepository::count).unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn cursor_is_last_success_minus_overlap() {
        let api = Arc::new(FakeApiClient::new());
        let ctx = ctx(api.clone());
        ctx.db
            .with_conn(|conn| {
                Properties::set_last_sync_success(conn, ResourceKind::Assignments, now())
            })
            .unwrap();

        ResourceHandler::<AssignmentData>::new(TaskKind::GetAssignments)
            .run(&ctx, &task(TaskKind::GetAssignments, ""))
            .await
            .unwrap();

        assert_eq!(
            api.calls()[0].updated_after,
            Some(now() - TimeDelta::hours(1))
        );
    }

    #[tokio::test]
    async fn subjects_by_id_sends_the_ids() {
        let api = Arc::new(FakeApiClient::new());
        let ctx = ctx(api.clone());
        ResourceHandler::<SubjectData>::new(TaskKind::GetSubjectsById)
            .run(&ctx, &task(TaskKind::GetSubjectsById, "5,6"))
            .await
            .unwrap();

        let call = &api.calls()[0];
        assert_eq!(call.path, "/subjects");
        assert_eq!(call.ids, vec![5, 6]);
        assert_eq!(call.updated_after, None);
    }

    #[tokio::test]
    async fn api_errors_propagate() {
        let api = Arc::new(FakeApiClient::new());
        api.push_error("/assignments", ApiError::Transient("503".into()));
        let ctx = ctx(api);
        let err = ResourceHandler::<AssignmentData>::new(TaskKind::GetAssignments)
            .run(&ctx, &task(TaskKind::GetAssignments, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Api(ApiError::Transient(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_time_out_as_transient() {
        let api = Arc::new(FakeApiClient::new());
        api.set_delay(Duration::from_secs(60));
        let ctx = ctx(api);
        let err = ResourceHandler::<AssignmentData>::new(TaskKind::GetAssignments)
            .run(&ctx, &task(TaskKind::GetAssignments, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Api(ApiError::Transient(_))));
    }
}

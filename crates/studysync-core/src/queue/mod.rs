//! Queue module: persistent task queue, per-attempt state, retry policy.
//!
//! 正本は SQLite の `task_definition` テーブル。プロセスが落ちても定義は残り、
//! 次の drain で再実行される（at-least-once）。

mod retry;
mod state;

pub use retry::{RetryGate, RetryPolicy};
pub use state::AttemptState;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ApiState, TaskDefinition, TaskId, TaskKind};
use crate::error::StoreError;
use crate::ports::{Clock, IdGenerator};
use crate::store::{Database, TaskDefinitionRepository};

/// Pending task counts, for status views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub total: usize,
    pub by_kind: BTreeMap<TaskKind, usize>,
}

/// Durable queue of task definitions.
///
/// # Design intent
/// - 冪等な kind は同時に 1 件まで（再 enqueue は no-op）
/// - parameterized な kind（`get_subjects_by_id`）は payload ごとに積む
/// - 定義は書き換えない。成功時に runner が `remove` する
pub struct PersistentTaskQueue {
    db: Arc<Database>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl PersistentTaskQueue {
    pub fn new(db: Arc<Database>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { db, ids, clock }
    }

    /// Insert a definition unless an equivalent one is already pending.
    ///
    /// Returns the new id, or `None` when deduplicated. A failed write leaves
    /// the queue unchanged.
    pub fn enqueue(&self, kind: TaskKind, data: &str) -> Result<Option<TaskId>, StoreError> {
        self.db.transaction(|conn| {
            if !kind.is_parameterized() && TaskDefinitionRepository::exists_kind(conn, kind)? {
                debug!(%kind, "already queued");
                return Ok(None);
            }
            let def = TaskDefinition {
                id: self.ids.generate_task_id(),
                kind,
                data: data.to_string(),
                seq: TaskDefinitionRepository::next_seq(conn)?,
                queued_at: self.clock.now(),
            };
            TaskDefinitionRepository::insert(conn, &def)?;
            debug!(%kind, task_id = %def.id, seq = def.seq, "task enqueued");
            Ok(Some(def.id))
        })
    }

    /// Highest-priority definition that may run now.
    ///
    /// Nothing runs when API calls are not allowed or the state halts execution.
    /// Otherwise the first definition in priority order whose kind is allowed
    /// in `api_state` is returned.
    pub fn next_runnable(
        &self,
        online_allowed: bool,
        api_state: ApiState,
    ) -> Result<Option<TaskDefinition>, StoreError> {
        if !online_allowed || api_state.halts_execution() {
            return Ok(None);
        }
        let pending = self.pending()?;
        Ok(pending.into_iter().find(|def| def.kind.may_run_in(api_state)))
    }

    pub fn remove(&self, id: TaskId) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| TaskDefinitionRepository::delete(conn, id))
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(TaskDefinitionRepository::count)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.count()? == 0)
    }

    /// All pending definitions in execution order.
    pub fn pending(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        self.db.with_conn(TaskDefinitionRepository::list_ordered)
    }

    pub fn has_pending(&self, kind: TaskKind) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| TaskDefinitionRepository::exists_kind(conn, kind))
    }

    pub fn counts(&self) -> Result<QueueCounts, StoreError> {
        let by_kind = self.db.with_conn(TaskDefinitionRepository::counts_by_kind)?;
        Ok(QueueCounts {
            total: by_kind.values().sum(),
            by_kind,
        })
    }
}

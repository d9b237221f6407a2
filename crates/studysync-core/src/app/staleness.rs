//! StalenessPolicy - どの task kind を今 enqueue すべきか
//!
//! 判定そのものは純粋関数（`due_kinds`）。副作用は queue への enqueue だけで、
//! ネットワーク I/O は一切しない。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::debug;

use super::api_state::ApiStateMachine;
use crate::domain::{ApiState, ResourceKind, TaskKind};
use crate::error::StoreError;
use crate::queue::PersistentTaskQueue;
use crate::store::{Database, Properties};

/// Result of one `assert_due_tasks` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertReport {
    /// Called again within `min_interval`; nothing was checked.
    pub suppressed: bool,
    /// Kinds that were actually inserted (deduplicated ones are not listed).
    pub enqueued: Vec<TaskKind>,
    pub api_state: ApiState,
}

impl AssertReport {
    /// Whether draining the queue can do anything in this state.
    pub fn can_trigger(&self) -> bool {
        !self.suppressed && !self.api_state.halts_execution()
    }
}

/// Task kinds due at `now`, in priority order.
///
/// The profile task is due whenever the state is anything but `Ok`, on top of
/// its own threshold.
pub fn due_kinds(
    now: DateTime<Utc>,
    api_state: ApiState,
    last_success: &BTreeMap<ResourceKind, DateTime<Utc>>,
) -> Vec<TaskKind> {
    let mut due: Vec<TaskKind> = ResourceKind::ALL
        .into_iter()
        .filter(|r| r.is_due(now, last_success.get(r).copied()))
        .map(ResourceKind::task_kind)
        .collect();
    if api_state != ApiState::Ok && !due.contains(&TaskKind::GetUser) {
        due.insert(0, TaskKind::GetUser);
    }
    due
}

pub struct StalenessPolicy {
    db: Arc<Database>,
    queue: Arc<PersistentTaskQueue>,
    api_state: Arc<ApiStateMachine>,
    last_assert: Mutex<Option<DateTime<Utc>>>,
}

impl StalenessPolicy {
    pub fn new(
        db: Arc<Database>,
        queue: Arc<PersistentTaskQueue>,
        api_state: Arc<ApiStateMachine>,
    ) -> Self {
        Self {
            db,
            queue,
            api_state,
            last_assert: Mutex::new(None),
        }
    }

    /// Enqueue every task kind whose resource is stale.
    ///
    /// A second call within `min_interval` of the previous one is a no-op.
    /// `Duration::ZERO` never suppresses.
    pub fn assert_due_tasks(
        &self,
        now: DateTime<Utc>,
        min_interval: Duration,
    ) -> Result<AssertReport, StoreError> {
        {
            let mut last = self
                .last_assert
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let window = TimeDelta::from_std(min_interval).unwrap_or(TimeDelta::weeks(52));
            if let Some(prev) = *last
                && !min_interval.is_zero()
                && now.signed_duration_since(prev) < window
            {
                debug!(%prev, "assert suppressed by min interval");
                return Ok(AssertReport {
                    suppressed: true,
                    enqueued: Vec::new(),
                    api_state: self.api_state.current(),
                });
            }
            *last = Some(now);
        }

        let api_state = self.api_state.evaluate()?;
        let last_success = self.db.with_conn(|conn| {
            let mut map = BTreeMap::new();
            for resource in ResourceKind::ALL {
                if let Some(at) = Properties::last_sync_success(conn, resource)? {
                    map.insert(resource, at);
                }
            }
            Ok(map)
        })?;

        let mut enqueued = Vec::new();
        for kind in due_kinds(now, api_state, &last_success) {
            if self.queue.enqueue(kind, "")?.is_some() {
                enqueued.push(kind);
            }
        }
        debug!(%api_state, ?enqueued, "due tasks asserted");
        Ok(AssertReport {
            suppressed: false,
            enqueued,
            api_state,
        })
    }
}

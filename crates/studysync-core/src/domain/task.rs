use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskKind};

/// A queued API operation, as persisted in `task_definition`.
///
/// Created by the staleness policy or an explicit trigger, deleted by the
/// runner once the operation fully succeeds. Never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Kind-specific parameters (empty for idempotent kinds).
    pub data: String,
    /// Creation order; breaks priority ties.
    pub seq: i64,
    pub queued_at: DateTime<Utc>,
}

impl TaskDefinition {
    pub fn priority(&self) -> u32 {
        self.kind.priority()
    }
}

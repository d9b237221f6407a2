//! Outcome model: result of one task attempt.
//!
//! The runner converts every error at the task execution boundary into one of
//! these, so nothing escapes to the background worker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, TaskError};
use crate::queue::AttemptState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    /// Task deleted, last-success advanced.
    Succeeded { applied: usize, skipped: usize },

    /// Task stays queued (transient network, rate limit, local storage).
    Retryable {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<Duration>,
    },

    /// Credentials rejected. Everything halts until the user retries.
    Rejected { reason: String },

    /// Retrying will not help. Task is dropped; staleness re-enqueues later.
    Fatal { reason: String },
}

impl TaskOutcome {
    pub fn attempt_state(&self) -> AttemptState {
        match self {
            TaskOutcome::Succeeded { .. } => AttemptState::Succeeded,
            TaskOutcome::Retryable { .. } => AttemptState::FailedRetryable,
            TaskOutcome::Rejected { .. } | TaskOutcome::Fatal { .. } => AttemptState::FailedFatal,
        }
    }

    /// Does this outcome end the current drain?
    pub fn stops_drain(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Retryable { .. } | TaskOutcome::Rejected { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }
}

impl From<TaskError> for TaskOutcome {
    fn from(err: TaskError) -> Self {
        let reason = err.to_string();
        match err {
            TaskError::Api(ApiError::Unauthorized(_)) => TaskOutcome::Rejected { reason },
            TaskError::Api(ref api) if api.is_retryable() => TaskOutcome::Retryable {
                retry_after: api.retry_after(),
                reason,
            },
            TaskError::Api(_) | TaskError::InvalidPayload(_) | TaskError::HandlerNotFound(_) => {
                TaskOutcome::Fatal { reason }
            }
            TaskError::Store(_) => TaskOutcome::Retryable {
                reason,
                retry_after: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskKind;
    use crate::error::StoreError;

    #[test]
    fn unauthorized_is_rejected() {
        let outcome = TaskOutcome::from(TaskError::Api(ApiError::Unauthorized("401".into())));
        assert!(matches!(outcome, TaskOutcome::Rejected { .. }));
        assert!(outcome.stops_drain());
        assert_eq!(outcome.attempt_state(), AttemptState::FailedFatal);
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let outcome = TaskOutcome::from(TaskError::Api(ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        }));
        assert_eq!(
            outcome,
            TaskOutcome::Retryable {
                reason: "rate limited (retry after Some(60s))".to_string(),
                retry_after: Some(Duration::from_secs(60)),
            }
        );
    }

    #[test]
    fn storage_failure_is_retryable() {
        let outcome = TaskOutcome::from(TaskError::Store(StoreError::Poisoned));
        assert_eq!(outcome.attempt_state(), AttemptState::FailedRetryable);
    }

    #[test]
    fn fatal_does_not_stop_the_drain() {
        let outcome = TaskOutcome::from(TaskError::HandlerNotFound(TaskKind::GetSummary));
        assert!(matches!(outcome, TaskOutcome::Fatal { .. }));
        assert!(!outcome.stops_drain());
    }

    #[test]
    fn outcome_is_tagged() {
        let v = serde_json::to_value(TaskOutcome::Succeeded {
            applied: 3,
            skipped: 0,
        })
        .unwrap();
        assert_eq!(v["kind"], "SUCCEEDED");
        assert_eq!(v["applied"], 3);
    }
}

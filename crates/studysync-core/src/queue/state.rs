//! Per-attempt state machine.

use serde::{Deserialize, Serialize};

/// State of one task attempt.
///
/// State transitions:
/// - Pending -> Running -> Succeeded (definition deleted)
/// - Pending -> Running -> FailedRetryable (definition stays queued)
/// - Pending -> Running -> FailedFatal (credentials rejected, or task dropped)
///
/// Only the definition is persisted; the attempt state lives for the
/// duration of one runner pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptState {
    Pending,
    Running,
    Succeeded,
    FailedRetryable,
    FailedFatal,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded | AttemptState::FailedRetryable | AttemptState::FailedFatal
        )
    }
}

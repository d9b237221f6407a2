//! TaskKind - キューに積まれる同期オペレーションの種類
//!
//! 優先度は種類ごとに固定。大きいほど先に実行される。
//! profile（GetUser）が最優先で、他のリソースより先に最新化されている必要がある。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{ApiState, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    GetUser,
    GetSrsSystems,
    GetLevelProgression,
    GetSubjects,
    /// Re-fetch a specific set of subjects. Payload: comma-separated ids.
    GetSubjectsById,
    GetAssignments,
    GetReviewStatistics,
    GetStudyMaterials,
    GetSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task kind '{0}'")]
pub struct UnknownTaskKind(pub String);

impl TaskKind {
    /// All kinds in descending priority order.
    pub const ALL: [TaskKind; 9] = [
        TaskKind::GetUser,
        TaskKind::GetSrsSystems,
        TaskKind::GetLevelProgression,
        TaskKind::GetSubjects,
        TaskKind::GetSubjectsById,
        TaskKind::GetAssignments,
        TaskKind::GetReviewStatistics,
        TaskKind::GetStudyMaterials,
        TaskKind::GetSummary,
    ];

    pub fn priority(self) -> u32 {
        match self {
            TaskKind::GetUser => 100,
            TaskKind::GetSrsSystems => 90,
            TaskKind::GetLevelProgression => 80,
            TaskKind::GetSubjects => 70,
            TaskKind::GetSubjectsById => 65,
            TaskKind::GetAssignments => 60,
            TaskKind::GetReviewStatistics => 50,
            TaskKind::GetStudyMaterials => 40,
            TaskKind::GetSummary => 30,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::GetUser => "get_user",
            TaskKind::GetSrsSystems => "get_srs_systems",
            TaskKind::GetLevelProgression => "get_level_progression",
            TaskKind::GetSubjects => "get_subjects",
            TaskKind::GetSubjectsById => "get_subjects_by_id",
            TaskKind::GetAssignments => "get_assignments",
            TaskKind::GetReviewStatistics => "get_review_statistics",
            TaskKind::GetStudyMaterials => "get_study_materials",
            TaskKind::GetSummary => "get_summary",
        }
    }

    pub fn resource(self) -> ResourceKind {
        match self {
            TaskKind::GetUser => ResourceKind::Profile,
            TaskKind::GetSrsSystems => ResourceKind::SrsSystems,
            TaskKind::GetLevelProgression => ResourceKind::Levels,
            TaskKind::GetSubjects | TaskKind::GetSubjectsById => ResourceKind::Subjects,
            TaskKind::GetAssignments => ResourceKind::Assignments,
            TaskKind::GetReviewStatistics => ResourceKind::ReviewStatistics,
            TaskKind::GetStudyMaterials => ResourceKind::StudyMaterials,
            TaskKind::GetSummary => ResourceKind::Summary,
        }
    }

    /// Parameterized kinds may have several pending entries (one per payload).
    pub fn is_parameterized(self) -> bool {
        matches!(self, TaskKind::GetSubjectsById)
    }

    /// Only a full, unparameterized sync moves the resource's last-success mark.
    pub fn advances_sync_state(self) -> bool {
        !self.is_parameterized()
    }

    /// Does a successful run change data the time line is built from?
    pub fn affects_timeline(self) -> bool {
        matches!(
            self,
            TaskKind::GetUser
                | TaskKind::GetSubjects
                | TaskKind::GetSubjectsById
                | TaskKind::GetAssignments
        )
    }

    /// ApiState gating. The profile task may also run in degraded states to
    /// attempt recovery; nothing runs without (accepted) credentials.
    pub fn may_run_in(self, state: ApiState) -> bool {
        match self {
            TaskKind::GetUser => matches!(
                state,
                ApiState::Ok | ApiState::NeedsRefresh | ApiState::TransientError | ApiState::Unknown
            ),
            _ => state == ApiState::Ok,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownTaskKind(s.to_string()))
    }
}

//! Resource kinds mirrored from the remote API, and their staleness thresholds.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::TaskKind;

/// A category of remote data mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Profile,
    SrsSystems,
    Levels,
    Subjects,
    Assignments,
    ReviewStatistics,
    StudyMaterials,
    Summary,
}

impl ResourceKind {
    /// All kinds, in the order their refresh tasks run.
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Profile,
        ResourceKind::SrsSystems,
        ResourceKind::Levels,
        ResourceKind::Subjects,
        ResourceKind::Assignments,
        ResourceKind::ReviewStatistics,
        ResourceKind::StudyMaterials,
        ResourceKind::Summary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Profile => "profile",
            ResourceKind::SrsSystems => "srs_systems",
            ResourceKind::Levels => "levels",
            ResourceKind::Subjects => "subjects",
            ResourceKind::Assignments => "assignments",
            ResourceKind::ReviewStatistics => "review_statistics",
            ResourceKind::StudyMaterials => "study_materials",
            ResourceKind::Summary => "summary",
        }
    }

    /// Maximum tolerable age of the last successful sync.
    ///
    /// The profile threshold feeds the NEEDS_REFRESH api state rather than
    /// the staleness scan.
    pub fn threshold(self) -> TimeDelta {
        match self {
            ResourceKind::Profile => TimeDelta::hours(1),
            ResourceKind::SrsSystems | ResourceKind::Levels => TimeDelta::weeks(1),
            ResourceKind::Subjects => TimeDelta::days(1),
            ResourceKind::Assignments
            | ResourceKind::ReviewStatistics
            | ResourceKind::StudyMaterials
            | ResourceKind::Summary => TimeDelta::hours(1),
        }
    }

    /// Is a refresh due, given the last successful sync?
    ///
    /// Never synced counts as due. A last-success in the future (clock moved
    /// backwards) does not.
    pub fn is_due(self, now: DateTime<Utc>, last_success: Option<DateTime<Utc>>) -> bool {
        match last_success {
            None => true,
            Some(last) => now.signed_duration_since(last) > self.threshold(),
        }
    }

    /// API path relative to the base url.
    pub fn path(self) -> &'static str {
        match self {
            ResourceKind::Profile => "/user",
            ResourceKind::SrsSystems => "/spaced_repetition_systems",
            ResourceKind::Levels => "/level_progressions",
            ResourceKind::Subjects => "/subjects",
            ResourceKind::Assignments => "/assignments",
            ResourceKind::ReviewStatistics => "/review_statistics",
            ResourceKind::StudyMaterials => "/study_materials",
            ResourceKind::Summary => "/summary",
        }
    }

    /// Collections are paged and support the "updated after" cursor.
    pub fn is_collection(self) -> bool {
        !matches!(self, ResourceKind::Profile | ResourceKind::Summary)
    }

    /// The idempotent task that refreshes this resource.
    pub fn task_kind(self) -> TaskKind {
        match self {
            ResourceKind::Profile => TaskKind::GetUser,
            ResourceKind::SrsSystems => TaskKind::GetSrsSystems,
            ResourceKind::Levels => TaskKind::GetLevelProgression,
            ResourceKind::Subjects => TaskKind::GetSubjects,
            ResourceKind::Assignments => TaskKind::GetAssignments,
            ResourceKind::ReviewStatistics => TaskKind::GetReviewStatistics,
            ResourceKind::StudyMaterials => TaskKind::GetStudyMaterials,
            ResourceKind::Summary => TaskKind::GetSummary,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    #[rstest]
    #[case(ResourceKind::Assignments, TimeDelta::minutes(59), false)]
    #[case(ResourceKind::Assignments, TimeDelta::minutes(61), true)]
    #[case(ResourceKind::Subjects, TimeDelta::hours(23), false)]
    #[case(ResourceKind::Subjects, TimeDelta::hours(25), true)]
    #[case(ResourceKind::SrsSystems, TimeDelta::days(6), false)]
    #[case(ResourceKind::Levels, TimeDelta::days(8), true)]
    fn due_after_threshold(
        #[case] kind: ResourceKind,
        #[case] age: TimeDelta,
        #[case] expected: bool,
    ) {
        let now = at(12);
        assert_eq!(kind.is_due(now, Some(now - age)), expected);
    }

    #[test]
    fn exactly_at_threshold_is_not_due() {
        let now = at(12);
        assert!(!ResourceKind::Summary.is_due(now, Some(now - TimeDelta::hours(1))));
    }

    #[test]
    fn never_synced_is_due() {
        for kind in ResourceKind::ALL {
            assert!(kind.is_due(at(0), None));
        }
    }

    #[test]
    fn future_last_success_is_not_due() {
        assert!(!ResourceKind::Assignments.is_due(at(1), Some(at(5))));
    }

    #[test]
    fn singular_resources_are_not_collections() {
        assert!(!ResourceKind::Profile.is_collection());
        assert!(!ResourceKind::Summary.is_collection());
        assert!(ResourceKind::Assignments.is_collection());
    }
}

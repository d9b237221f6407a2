//! Status - エンジンの現在状態をまとめて返すクエリ
//!
//! CLI の `status` やダッシュボードが使う。書き込みはしない。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::builder::Engine;
use crate::domain::{ApiState, OnlineStatus, ResourceKind, TimeLine};
use crate::error::StoreError;
use crate::queue::QueueCounts;
use crate::store::subjects::BurnedItem;
use crate::store::{LevelProgressionRepository, Properties, SubjectRepository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeLineSummary {
    pub available_lessons: usize,
    pub available_reviews: usize,
    pub level_up_reviews: usize,
    pub upcoming: Vec<usize>,
    pub num_long_term_upcoming: usize,
    pub long_term_upcoming_date: Option<DateTime<Utc>>,
}

impl From<&TimeLine> for TimeLineSummary {
    fn from(tl: &TimeLine) -> Self {
        Self {
            available_lessons: tl.available_lessons.len(),
            available_reviews: tl.available_reviews.len(),
            level_up_reviews: tl.num_level_up_reviews(),
            upcoming: tl.upcoming.clone(),
            num_long_term_upcoming: tl.num_long_term_upcoming,
            long_term_upcoming_date: tl.long_term_upcoming_date,
        }
    }
}

/// Snapshot explaining what the engine is doing and why it may be stuck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub api_state: ApiState,
    pub online: OnlineStatus,
    pub username: Option<String>,
    pub user_level: i32,
    pub level_reached_at: Option<DateTime<Utc>>,
    pub vacation_mode: bool,
    pub queue: QueueCounts,
    pub last_sync: BTreeMap<ResourceKind, Option<DateTime<Utc>>>,
    pub last_api_success: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub time_line: TimeLineSummary,
}

impl Engine {
    pub fn status(&self) -> Result<EngineStatus, StoreError> {
        let api_state = self.api_state.evaluate()?;
        let queue = self.queue.counts()?;
        let time_line = TimeLineSummary::from(self.projector.current().as_ref());
        self.db.with_conn(|conn| {
            let user_level = Properties::user_level(conn)?;
            let mut last_sync = BTreeMap::new();
            for resource in ResourceKind::ALL {
                last_sync.insert(resource, Properties::last_sync_success(conn, resource)?);
            }
            Ok(EngineStatus {
                api_state,
                online: self.connectivity.status(),
                username: Properties::username(conn)?,
                user_level,
                level_reached_at: LevelProgressionRepository::level_reached_date(conn, user_level)?,
                vacation_mode: Properties::vacation_mode(conn)?,
                queue,
                last_sync,
                last_api_success: Properties::last_api_success(conn)?,
                retry_at: self.runner.retry_at(),
                consecutive_failures: self.runner.consecutive_failures(),
                time_line,
            })
        })
    }

    /// When the user reached their current level.
    pub fn level_reached_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.db.with_conn(|conn| {
            let level = Properties::user_level(conn)?;
            LevelProgressionRepository::level_reached_date(conn, level)
        })
    }

    pub fn recent_burns(&self) -> Result<Vec<BurnedItem>, StoreError> {
        let now = self.clock.now();
        self.db
            .with_conn(|conn| SubjectRepository::recent_burns(conn, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineBuilder;
    use crate::config::SyncConfig;
    use crate::domain::TaskKind;
    use crate::ports::FixedClock;
    use crate::store::Database;
    use crate::store::levels::LevelProgressionFields;
    use crate::testing::FakeApiClient;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn engine() -> Engine {
        EngineBuilder::new(SyncConfig::default())
            .database(Arc::new(Database::open_in_memory().unwrap()))
            .api_client(Arc::new(FakeApiClient::new()))
            .clock(Arc::new(FixedClock::new(now())))
            .build()
            .unwrap()
    }

    #[test]
    fn fresh_engine_status() {
        let engine = engine();
        engine.queue().enqueue(TaskKind::GetUser, "").unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.api_state, ApiState::Unconfigured);
        assert_eq!(status.queue.total, 1);
        assert_eq!(status.last_sync.len(), ResourceKind::ALL.len());
        assert!(status.last_sync.values().all(Option::is_none));
        assert_eq!(status.time_line.available_lessons, 0);
        assert_eq!(status.retry_at, None);
    }

    #[test]
    fn level_reached_date_uses_current_level() {
        let engine = engine();
        let started = now() - TimeDelta::days(4);
        engine
            .database()
            .with_conn(|conn| {
                Properties::set_user_level(conn, 2)?;
                LevelProgressionRepository::upsert(
                    conn,
                    1,
                    &LevelProgressionFields {
                        level: 2,
                        unlocked_at: Some(started),
                        started_at: Some(started),
                        passed_at: None,
                        completed_at: None,
                        abandoned_at: None,
                        created_at: Some(started),
                    },
                )
            })
            .unwrap();

        assert_eq!(engine.level_reached_date().unwrap(), Some(started));
        assert_eq!(engine.status().unwrap().level_reached_at, Some(started));
    }
}

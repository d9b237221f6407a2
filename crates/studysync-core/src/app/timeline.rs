//! TimeLineProjector - ストレージから TimeLine を丸ごと作り直して publish する
//!
//! 再計算のきっかけ:
//! - lesson / review に関わるタスクの成功（runner から呼ばれる）
//! - 時（hour）の境界をまたいだ
//! - 分の境界をまたぎ、今すぐの review はないが今の 1 時間内に来る review がある

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::config::VacationPolicy;
use crate::domain::{TimeLine, top_of_hour};
use crate::error::StoreError;
use crate::observable::LiveValue;
use crate::store::{Database, Properties, SubjectRepository};

/// Build a snapshot from storage. Pure read.
pub fn build_timeline(
    conn: &Connection,
    now: DateTime<Utc>,
    size: usize,
    policy: VacationPolicy,
) -> Result<TimeLine, StoreError> {
    let mut timeline = TimeLine::empty(size, now);
    let vacation = Properties::vacation_mode(conn)?;
    if vacation && policy == VacationPolicy::SuppressAll {
        return Ok(timeline);
    }

    let user_level = Properties::user_level(conn)?;
    let level_cap = user_level.min(Properties::max_level_granted(conn)?);

    if !vacation {
        for item in SubjectRepository::available_lessons(conn, level_cap)? {
            timeline.add_lesson(item);
        }
    }

    let mut reviews = SubjectRepository::reviews_until(conn, level_cap, timeline.cutoff())?;
    SubjectRepository::flag_level_up(conn, user_level, &mut reviews)?;
    for item in reviews {
        timeline.add_review(item, now);
    }
    if vacation {
        timeline.available_reviews.clear();
    }

    if let Some((date, count)) =
        SubjectRepository::next_long_term_reviews(conn, level_cap, timeline.cutoff())?
    {
        timeline.long_term_upcoming_date = Some(date);
        timeline.num_long_term_upcoming = count;
    }
    Ok(timeline)
}

pub struct TimeLineProjector {
    db: Arc<Database>,
    live: Arc<LiveValue<TimeLine>>,
    size: usize,
    policy: VacationPolicy,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl TimeLineProjector {
    pub fn new(
        db: Arc<Database>,
        size: usize,
        policy: VacationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            db,
            live: Arc::new(LiveValue::new(TimeLine::empty(size, now))),
            size,
            policy,
            last_tick: Mutex::new(None),
        }
    }

    pub fn live(&self) -> Arc<LiveValue<TimeLine>> {
        Arc::clone(&self.live)
    }

    pub fn current(&self) -> Arc<TimeLine> {
        self.live.get()
    }

    /// Rebuild and publish. Observers only ever see complete snapshots.
    pub fn recompute(&self, now: DateTime<Utc>) -> Result<Arc<TimeLine>, StoreError> {
        let timeline = self
            .db
            .with_conn(|conn| build_timeline(conn, now, self.size, self.policy))?;
        debug!(
            lessons = timeline.available_lessons.len(),
            reviews = timeline.available_reviews.len(),
            upcoming = timeline.num_upcoming(),
            "time line recomputed"
        );
        self.live.publish(timeline);
        Ok(self.live.get())
    }

    /// Periodic tick. Returns whether a recomputation happened.
    pub fn on_tick(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let previous = self
            .last_tick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(now);
        let needed = match previous {
            None => true,
            Some(prev) => self.boundary_needs_update(prev, now),
        };
        if needed {
            self.recompute(now)?;
        }
        Ok(needed)
    }

    fn boundary_needs_update(&self, prev: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if top_of_hour(prev) != top_of_hour(now) {
            return true;
        }
        let minute = |t: DateTime<Utc>| t.duration_trunc(TimeDelta::minutes(1)).unwrap_or(t);
        if minute(prev) == minute(now) {
            return false;
        }
        let current = self.current();
        !current.has_available_reviews() && current.has_reviews_due_this_hour()
    }
}

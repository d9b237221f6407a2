//! NotificationPlanner - time line が変わるたびに通知を出す / 消す / 何もしないを決める
//!
//! 判定:
//! - vacation 中 -> 常に Cancel
//! - 前回通知以降に available になった review がある -> Post
//! - lesson も review もなく、通知が出ている -> Cancel
//! - それ以外 -> Nothing

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::top_of_hour;
use crate::error::StoreError;
use crate::ports::Notifier;
use crate::store::{Database, Properties, SubjectRepository};
use crate::store::subjects::NotificationContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NotificationDecision {
    Post {
        lessons: usize,
        reviews: usize,
        new_reviews: usize,
    },
    Cancel,
    Nothing,
}

/// Pure part of the decision.
pub fn decide(
    ctx: &NotificationContext,
    vacation: bool,
    notification_set: bool,
) -> NotificationDecision {
    if vacation {
        NotificationDecision::Cancel
    } else if ctx.new_reviews > 0 {
        NotificationDecision::Post {
            lessons: ctx.lessons,
            reviews: ctx.reviews,
            new_reviews: ctx.new_reviews,
        }
    } else if ctx.lessons == 0 && ctx.reviews == 0 && notification_set {
        NotificationDecision::Cancel
    } else {
        NotificationDecision::Nothing
    }
}

pub struct NotificationPlanner {
    db: Arc<Database>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationPlanner {
    pub fn new(db: Arc<Database>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    fn load(
        conn: &Connection,
        now: DateTime<Utc>,
    ) -> Result<(NotificationContext, bool, bool), StoreError> {
        let level_cap = Properties::user_level(conn)?.min(Properties::max_level_granted(conn)?);
        // first run: only reviews from the last hour count as new
        let last_notified = Properties::last_notified_review_date(conn)?
            .unwrap_or_else(|| top_of_hour(now - TimeDelta::hours(1)));
        let ctx = SubjectRepository::notification_context(conn, level_cap, Some(last_notified), now)?;
        Ok((
            ctx,
            Properties::vacation_mode(conn)?,
            Properties::notification_set(conn)?,
        ))
    }

    /// Decide without side effects.
    pub fn plan(&self, now: DateTime<Utc>) -> Result<NotificationDecision, StoreError> {
        let (ctx, vacation, set) = self.db.with_conn(|conn| Self::load(conn, now))?;
        Ok(decide(&ctx, vacation, set))
    }

    /// Decide, deliver to the notifier and persist the bookkeeping.
    pub fn notify(&self, now: DateTime<Utc>) -> Result<NotificationDecision, StoreError> {
        let (ctx, vacation, set) = self.db.with_conn(|conn| Self::load(conn, now))?;
        let decision = decide(&ctx, vacation, set);
        match &decision {
            NotificationDecision::Post {
                lessons,
                reviews,
                new_reviews,
            } => {
                self.notifier.post(*lessons, *reviews, *new_reviews);
                self.db.transaction(|conn| {
                    Properties::set_notification_set(conn, true)?;
                    if let Some(newest) = ctx.newest_available_at {
                        Properties::set_last_notified_review_date(conn, newest)?;
                    }
                    Ok(())
                })?;
                info!(lessons, reviews, new_reviews, "notification posted");
            }
            NotificationDecision::Cancel => {
                self.notifier.cancel();
                self.db
                    .with_conn(|conn| Properties::set_notification_set(conn, false))?;
                info!(vacation, "notification cancelled");
            }
            NotificationDecision::Nothing => debug!("no notification change"),
        }
        Ok(decision)
    }
}

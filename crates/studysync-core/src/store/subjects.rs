//! Subject rows and the queries the time line is built from.
//!
//! 1 subject = 1 行。assignment / review statistic / study material は
//! 参照先 subject 行の列を更新する（行がなければ作る）。

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use super::{from_millis, opt_millis, to_millis};
use crate::domain::TimeLineItem;
use crate::error::StoreError;

/// Last SRS stage before burned.
pub const MAX_REVIEW_STAGE: i32 = 8;

/// Share of a level's kanji that must be passed to level up.
const LEVEL_UP_RATIO: f64 = 0.9;

const RECENT_BURN_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFields {
    pub object: String,
    pub level: i32,
    pub slug: Option<String>,
    pub characters: Option<String>,
    pub hidden_at: Option<DateTime<Utc>>,
    pub lesson_position: i32,
    pub srs_system_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentFields {
    pub subject_id: i64,
    pub subject_type: String,
    pub srs_stage: i32,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub burned_at: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
    pub resurrected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewStatisticFields {
    pub subject_id: i64,
    pub subject_type: String,
    pub percentage_correct: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyMaterialFields {
    pub subject_id: i64,
    pub subject_type: String,
    pub meaning_note: Option<String>,
    pub reading_note: Option<String>,
}

/// Read model for dashboards and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRow {
    pub id: i64,
    pub object: String,
    pub level: i32,
    pub characters: Option<String>,
    pub assignment_id: Option<i64>,
    pub srs_stage: Option<i32>,
    pub available_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub burned_at: Option<DateTime<Utc>>,
    pub percentage_correct: Option<i32>,
    pub meaning_note: Option<String>,
    pub reading_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BurnedItem {
    pub subject_id: i64,
    pub object: String,
    pub characters: Option<String>,
    pub burned_at: DateTime<Utc>,
}

/// Counts the notification planner decides on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationContext {
    pub lessons: usize,
    pub reviews: usize,
    /// Reviews that became available after the last notified date.
    pub new_reviews: usize,
    pub newest_available_at: Option<DateTime<Utc>>,
}

pub struct SubjectRepository;

impl SubjectRepository {
    pub fn upsert_subject(
        conn: &Connection,
        id: i64,
        fields: &SubjectFields,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO subject (id, object, level, slug, characters, hidden_at,
                                  lesson_position, srs_system_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                object = excluded.object,
                level = excluded.level,
                slug = excluded.slug,
                characters = excluded.characters,
                hidden_at = excluded.hidden_at,
                lesson_position = excluded.lesson_position,
                srs_system_id = excluded.srs_system_id",
            params![
                id,
                fields.object,
                fields.level,
                fields.slug,
                fields.characters,
                opt_millis(fields.hidden_at),
                fields.lesson_position,
                fields.srs_system_id,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_assignment(
        conn: &Connection,
        assignment_id: i64,
        fields: &AssignmentFields,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO subject (id, object, assignment_id, srs_stage, unlocked_at, started_at,
                                  passed_at, burned_at, available_at, resurrected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                assignment_id = excluded.assignment_id,
                srs_stage = excluded.srs_stage,
                unlocked_at = excluded.unlocked_at,
                started_at = excluded.started_at,
                passed_at = excluded.passed_at,
                burned_at = excluded.burned_at,
                available_at = excluded.available_at,
                resurrected_at = excluded.resurrected_at",
            params![
                fields.subject_id,
                fields.subject_type,
                assignment_id,
                fields.srs_stage,
                opt_millis(fields.unlocked_at),
                opt_millis(fields.started_at),
                opt_millis(fields.passed_at),
                opt_millis(fields.burned_at),
                opt_millis(fields.available_at),
                opt_millis(fields.resurrected_at),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_review_statistic(
        conn: &Connection,
        fields: &ReviewStatisticFields,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO subject (id, object, percentage_correct) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET percentage_correct = excluded.percentage_correct",
            params![fields.subject_id, fields.subject_type, fields.percentage_correct],
        )?;
        Ok(())
    }

    pub fn upsert_study_material(
        conn: &Connection,
        fields: &StudyMaterialFields,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO subject (id, object, meaning_note, reading_note) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                meaning_note = excluded.meaning_note,
                reading_note = excluded.reading_note",
            params![
                fields.subject_id,
                fields.subject_type,
                fields.meaning_note,
                fields.reading_note,
            ],
        )?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<SubjectRow>, StoreError> {
        let row = conn
            .query_row(
                "SELECT id, object, level, characters, assignment_id, srs_stage, available_at,
                        passed_at, burned_at, percentage_correct, meaning_note, reading_note
                 FROM subject WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SubjectRow {
                        id: row.get(0)?,
                        object: row.get(1)?,
                        level: row.get(2)?,
                        characters: row.get(3)?,
                        assignment_id: row.get(4)?,
                        srs_stage: row.get(5)?,
                        available_at: row.get::<_, Option<i64>>(6)?.and_then(from_millis),
                        passed_at: row.get::<_, Option<i64>>(7)?.and_then(from_millis),
                        burned_at: row.get::<_, Option<i64>>(8)?.and_then(from_millis),
                        percentage_correct: row.get(9)?,
                        meaning_note: row.get(10)?,
                        reading_note: row.get(11)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn count(conn: &Connection) -> Result<usize, StoreError> {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM subject", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Unlocked, not yet started items up to `max_level`.
    pub fn available_lessons(
        conn: &Connection,
        max_level: i32,
    ) -> Result<Vec<TimeLineItem>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, object, level, characters, available_at FROM subject
             WHERE srs_stage = 0 AND unlocked_at IS NOT NULL AND started_at IS NULL
               AND hidden_at IS NULL AND level <= ?1
             ORDER BY level, lesson_position, id",
        )?;
        let rows = stmt.query_map(params![max_level], item_row)?;
        collect(rows)
    }

    /// Reviews in stages 1..=8 up to `max_level` whose `available_at` is
    /// before `cutoff`.
    pub fn reviews_until(
        conn: &Connection,
        max_level: i32,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TimeLineItem>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, object, level, characters, available_at FROM subject
             WHERE srs_stage BETWEEN 1 AND ?1 AND hidden_at IS NULL AND level <= ?2
               AND available_at IS NOT NULL AND available_at < ?3
             ORDER BY available_at, id",
        )?;
        let rows = stmt.query_map(
            params![MAX_REVIEW_STAGE, max_level, to_millis(cutoff)],
            item_row,
        )?;
        collect(rows)
    }

    /// Earliest review at or after `after`, with the number of reviews in the
    /// hour starting there.
    pub fn next_long_term_reviews(
        conn: &Connection,
        max_level: i32,
        after: DateTime<Utc>,
    ) -> Result<Option<(DateTime<Utc>, usize)>, StoreError> {
        let first: Option<i64> = conn.query_row(
            "SELECT MIN(available_at) FROM subject
             WHERE srs_stage BETWEEN 1 AND ?1 AND hidden_at IS NULL AND level <= ?2
               AND available_at >= ?3",
            params![MAX_REVIEW_STAGE, max_level, to_millis(after)],
            |row| row.get(0),
        )?;
        let Some(first) = first.and_then(from_millis) else {
            return Ok(None);
        };
        let end = first + TimeDelta::hours(1);
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM subject
             WHERE srs_stage BETWEEN 1 AND ?1 AND hidden_at IS NULL AND level <= ?2
               AND available_at >= ?3 AND available_at < ?4",
            params![MAX_REVIEW_STAGE, max_level, to_millis(first), to_millis(end)],
            |row| row.get(0),
        )?;
        Ok(Some((first, usize::try_from(n).unwrap_or(0))))
    }

    /// Whether the user still has kanji to pass at `level` before levelling up.
    pub fn level_up_pending(conn: &Connection, level: i32) -> Result<bool, StoreError> {
        let (total, passed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN passed_at IS NOT NULL THEN 1 ELSE 0 END), 0)
             FROM subject WHERE object = 'kanji' AND level = ?1 AND hidden_at IS NULL",
            params![level],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if total == 0 {
            return Ok(false);
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let needed = (total as f64 * LEVEL_UP_RATIO).ceil() as i64;
        Ok(needed - passed > 0)
    }

    /// Mark available reviews that count towards the next level-up.
    pub fn flag_level_up(
        conn: &Connection,
        user_level: i32,
        items: &mut [TimeLineItem],
    ) -> Result<(), StoreError> {
        if !Self::level_up_pending(conn, user_level)? {
            return Ok(());
        }
        let mut stmt = conn.prepare(
            "SELECT passed_at IS NULL FROM subject WHERE id = ?1 AND object = 'kanji' AND level = ?2",
        )?;
        for item in items.iter_mut() {
            let unpassed: Option<bool> = stmt
                .query_row(params![item.subject_id, user_level], |row| row.get(0))
                .optional()?;
            item.level_up = unpassed.unwrap_or(false);
        }
        Ok(())
    }

    /// Up to ten items burned within the last 30 days, newest first.
    pub fn recent_burns(
        conn: &Connection,
        now: DateTime<Utc>,
    ) -> Result<Vec<BurnedItem>, StoreError> {
        let since = now - TimeDelta::days(30);
        let mut stmt = conn.prepare(
            "SELECT id, object, characters, burned_at FROM subject
             WHERE burned_at IS NOT NULL AND burned_at >= ?1 AND resurrected_at IS NULL
             ORDER BY burned_at DESC, id LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![to_millis(since), RECENT_BURN_LIMIT as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            let (subject_id, object, characters, burned_at) = row?;
            let burned_at = from_millis(burned_at)
                .ok_or_else(|| StoreError::corrupt("subject", "burned_at out of range"))?;
            out.push(BurnedItem {
                subject_id,
                object,
                characters,
                burned_at,
            });
        }
        Ok(out)
    }

    pub fn notification_context(
        conn: &Connection,
        max_level: i32,
        last_notified: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<NotificationContext, StoreError> {
        let lessons: i64 = conn.query_row(
            "SELECT COUNT(*) FROM subject
             WHERE srs_stage = 0 AND unlocked_at IS NOT NULL AND started_at IS NULL
               AND hidden_at IS NULL AND level <= ?1",
            params![max_level],
            |row| row.get(0),
        )?;
        let (reviews, newest): (i64, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MAX(available_at) FROM subject
             WHERE srs_stage BETWEEN 1 AND ?1 AND hidden_at IS NULL AND level <= ?2
               AND available_at IS NOT NULL AND available_at <= ?3",
            params![MAX_REVIEW_STAGE, max_level, to_millis(now)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let since = last_notified.map_or(i64::MIN, to_millis);
        let new_reviews: i64 = conn.query_row(
            "SELECT COUNT(*) FROM subject
             WHERE srs_stage BETWEEN 1 AND ?1 AND hidden_at IS NULL AND level <= ?2
               AND available_at > ?3 AND available_at <= ?4",
            params![MAX_REVIEW_STAGE, max_level, since, to_millis(now)],
            |row| row.get(0),
        )?;
        Ok(NotificationContext {
            lessons: usize::try_from(lessons).unwrap_or(0),
            reviews: usize::try_from(reviews).unwrap_or(0),
            new_reviews: usize::try_from(new_reviews).unwrap_or(0),
            newest_available_at: newest.and_then(from_millis),
        })
    }
}

fn item_row(row: &Row<'_>) -> rusqlite::Result<TimeLineItem> {
    Ok(TimeLineItem {
        subject_id: row.get(0)?,
        object: row.get(1)?,
        level: row.get(2)?,
        characters: row.get(3)?,
        available_at: row.get::<_, Option<i64>>(4)?.and_then(from_millis),
        level_up: false,
    })
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<TimeLineItem>>,
) -> Result<Vec<TimeLineItem>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

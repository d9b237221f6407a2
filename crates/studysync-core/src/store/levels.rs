use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{from_millis, opt_millis};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelProgressionFields {
    pub level: i32,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrsSystemFields {
    pub name: String,
    pub unlocking_stage: i32,
    pub starting_stage: i32,
    pub passing_stage: i32,
    pub burning_stage: i32,
}

pub struct LevelProgressionRepository;

impl LevelProgressionRepository {
    pub fn upsert(
        conn: &Connection,
        id: i64,
        fields: &LevelProgressionFields,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO level_progression
                (id, level, unlocked_at, started_at, passed_at, completed_at, abandoned_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                level = excluded.level,
                unlocked_at = excluded.unlocked_at,
                started_at = excluded.started_at,
                passed_at = excluded.passed_at,
                completed_at = excluded.completed_at,
                abandoned_at = excluded.abandoned_at,
                created_at = excluded.created_at",
            params![
                id,
                fields.level,
                opt_millis(fields.unlocked_at),
                opt_millis(fields.started_at),
                opt_millis(fields.passed_at),
                opt_millis(fields.completed_at),
                opt_millis(fields.abandoned_at),
                opt_millis(fields.created_at),
            ],
        )?;
        Ok(())
    }

    /// When the user reached `level` (latest start among its progressions).
    pub fn level_reached_date(
        conn: &Connection,
        level: i32,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let ms: Option<i64> = conn.query_row(
            "SELECT MAX(started_at) FROM level_progression WHERE level = ?1",
            params![level],
            |row| row.get(0),
        )?;
        Ok(ms.and_then(from_millis))
    }
}

pub struct SrsSystemRepository;

impl SrsSystemRepository {
    pub fn upsert(conn: &Connection, id: i64, fields: &SrsSystemFields) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO srs_system
                (id, name, unlocking_stage, starting_stage, passing_stage, burning_stage)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                unlocking_stage = excluded.unlocking_stage,
                starting_stage = excluded.starting_stage,
                passing_stage = excluded.passing_stage,
                burning_stage = excluded.burning_stage",
            params![
                id,
                fields.name,
                fields.unlocking_stage,
                fields.starting_stage,
                fields.passing_stage,
                fields.burning_stage,
            ],
        )?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<SrsSystemFields>, StoreError> {
        let row = conn
            .query_row(
                "SELECT name, unlocking_stage, starting_stage, passing_stage, burning_stage
                 FROM srs_system WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SrsSystemFields {
                        name: row.get(0)?,
                        unlocking_stage: row.get(1)?,
                        starting_stage: row.get(2)?,
                        passing_stage: row.get(3)?,
                        burning_stage: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

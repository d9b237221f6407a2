//! SQL DDL.
//!
//! Idempotent: every statement uses `IF NOT EXISTS`.

use rusqlite::Connection;

use crate::error::StoreError;

pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS task_definition (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    priority INTEGER NOT NULL,
    data TEXT NOT NULL DEFAULT '',
    queued_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_task_definition_order
    ON task_definition(priority DESC, seq ASC);
CREATE INDEX IF NOT EXISTS idx_task_definition_kind
    ON task_definition(kind);

CREATE TABLE IF NOT EXISTS properties (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subject (
    id INTEGER PRIMARY KEY,
    object TEXT NOT NULL,
    level INTEGER NOT NULL DEFAULT 0,
    slug TEXT,
    characters TEXT,
    hidden_at INTEGER,
    lesson_position INTEGER NOT NULL DEFAULT 0,
    srs_system_id INTEGER,
    assignment_id INTEGER,
    srs_stage INTEGER,
    unlocked_at INTEGER,
    started_at INTEGER,
    passed_at INTEGER,
    burned_at INTEGER,
    available_at INTEGER,
    resurrected_at INTEGER,
    percentage_correct INTEGER,
    meaning_note TEXT,
    reading_note TEXT
);

CREATE INDEX IF NOT EXISTS idx_subject_level ON subject(level);
CREATE INDEX IF NOT EXISTS idx_subject_available ON subject(available_at);

CREATE TABLE IF NOT EXISTS level_progression (
    id INTEGER PRIMARY KEY,
    level INTEGER NOT NULL,
    unlocked_at INTEGER,
    started_at INTEGER,
    passed_at INTEGER,
    completed_at INTEGER,
    abandoned_at INTEGER,
    created_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_level_progression_level ON level_progression(level);

CREATE TABLE IF NOT EXISTS srs_system (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    unlocking_stage INTEGER NOT NULL,
    starting_stage INTEGER NOT NULL,
    passing_stage INTEGER NOT NULL,
    burning_stage INTEGER NOT NULL
);
";

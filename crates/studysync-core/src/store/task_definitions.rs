use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{from_millis, to_millis};
use crate::domain::{TaskDefinition, TaskId, TaskKind};
use crate::error::StoreError;

/// Rows of `task_definition`. Never updated in place.
pub struct TaskDefinitionRepository;

const COLUMNS: &str = "id, kind, data, seq, queued_at";

impl TaskDefinitionRepository {
    pub fn insert(conn: &Connection, def: &TaskDefinition) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO task_definition (id, seq, kind, priority, data, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                def.id.to_storage(),
                def.seq,
                def.kind.as_str(),
                def.priority(),
                def.data,
                to_millis(def.queued_at),
            ],
        )?;
        Ok(())
    }

    pub fn next_seq(conn: &Connection) -> Result<i64, StoreError> {
        let max: Option<i64> =
            conn.query_row("SELECT MAX(seq) FROM task_definition", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn exists_kind(conn: &Connection, kind: TaskKind) -> Result<bool, StoreError> {
        let found = conn
            .query_row(
                "SELECT 1 FROM task_definition WHERE kind = ?1 LIMIT 1",
                params![kind.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All definitions, highest priority first, then creation order.
    pub fn list_ordered(conn: &Connection) -> Result<Vec<TaskDefinition>, StoreError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM task_definition ORDER BY priority DESC, seq ASC"
        ))?;
        let rows = stmt.query_map([], raw_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_definition()?);
        }
        Ok(out)
    }

    pub fn get(conn: &Connection, id: TaskId) -> Result<Option<TaskDefinition>, StoreError> {
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM task_definition WHERE id = ?1"),
                params![id.to_storage()],
                raw_row,
            )
            .optional()?;
        raw.map(RawDefinition::into_definition).transpose()
    }

    /// Returns whether a row was deleted.
    pub fn delete(conn: &Connection, id: TaskId) -> Result<bool, StoreError> {
        let n = conn.execute(
            "DELETE FROM task_definition WHERE id = ?1",
            params![id.to_storage()],
        )?;
        Ok(n > 0)
    }

    pub fn count(conn: &Connection) -> Result<usize, StoreError> {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM task_definition", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    pub fn counts_by_kind(conn: &Connection) -> Result<BTreeMap<TaskKind, usize>, StoreError> {
        let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM task_definition GROUP BY kind")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (kind, n) = row?;
            let kind: TaskKind = kind
                .parse()
                .map_err(|e: crate::domain::UnknownTaskKind| {
                    StoreError::corrupt("task_definition", e.to_string())
                })?;
            out.insert(kind, usize::try_from(n).unwrap_or(0));
        }
        Ok(out)
    }
}

struct RawDefinition {
    id: String,
    kind: String,
    data: String,
    seq: i64,
    queued_at: i64,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawDefinition> {
    Ok(RawDefinition {
        id: row.get(0)?,
        kind: row.get(1)?,
        data: row.get(2)?,
        seq: row.get(3)?,
        queued_at: row.get(4)?,
    })
}

impl RawDefinition {
    fn into_definition(self) -> Result<TaskDefinition, StoreError> {
        let id = TaskId::parse(&self.id)
            .map_err(|e| StoreError::corrupt("task_definition", format!("id {}: {e}", self.id)))?;
        let kind = self
            .kind
            .parse::<TaskKind>()
            .map_err(|e| StoreError::corrupt("task_definition", e.to_string()))?;
        let queued_at = from_millis(self.queued_at)
            .ok_or_else(|| StoreError::corrupt("task_definition", "queued_at out of range"))?;
        Ok(TaskDefinition {
            id,
            kind,
            data: self.data,
            seq: self.seq,
            queued_at,
        })
    }
}

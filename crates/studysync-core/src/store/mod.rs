//! SQLite storage - ローカル状態の正本（source of truth）
//!
//! - `Database` は 1 プロセスに 1 つ。起動時に作って各コンポーネントへ注入する
//! - repository は `&Connection` を受け取るステートレスな関数の集まり
//! - 複数文の書き込みは `Database::transaction` で 1 トランザクションにまとめる
//!
//! 時刻はすべて UTC の epoch ミリ秒（INTEGER）で保存する。

pub mod levels;
pub mod migrations;
pub mod properties;
pub mod subjects;
pub mod task_definitions;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::error::StoreError;

pub use levels::{LevelProgressionRepository, SrsSystemRepository};
pub use properties::Properties;
pub use subjects::{NotificationContext, SubjectRepository};
pub use task_definitions::TaskDefinitionRepository;

/// Shared database handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        debug!(?path, "opening database");
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(%mode, "journal mode");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run read or single-statement work on the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction. Any error rolls everything back.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

pub(crate) fn opt_millis(t: Option<DateTime<Utc>>) -> Option<i64> {
    t.map(to_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), StoreError> = db.transaction(|conn| {
            Properties::set_raw(conn, "k", "v")?;
            Err(StoreError::corrupt("properties", "boom"))
        });
        assert!(result.is_err());

        let value = db.with_conn(|conn| Properties::get_raw(conn, "k")).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| Properties::set_raw(conn, "k", "v")).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        let value = reopened
            .with_conn(|conn| Properties::get_raw(conn, "k"))
            .unwrap();
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[test]
    fn millis_roundtrip() {
        let t = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(from_millis(to_millis(t)), Some(t));
    }
}

//! Properties - key/value 形式の小さな永続状態
//!
//! フラグ、ユーザー情報、リソースごとの last-success 時刻などをまとめて持つ。
//! 時刻は epoch ミリ秒を文字列で保存する。

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{from_millis, to_millis};
use crate::domain::ResourceKind;
use crate::error::StoreError;

const API_TOKEN: &str = "api_token";
const API_KEY_REJECTED: &str = "api_key_rejected";
const API_IN_ERROR: &str = "api_in_error";
const USER_REFRESH_REQUIRED: &str = "user_refresh_required";
const USER_LEVEL: &str = "user_level";
const MAX_LEVEL_GRANTED: &str = "max_level_granted";
const VACATION_MODE: &str = "vacation_mode";
const USERNAME: &str = "username";
const LAST_API_SUCCESS: &str = "last_api_success";
const LAST_BACKGROUND_SYNC: &str = "last_background_sync";
const FIRST_TIME_SETUP: &str = "first_time_setup";
const LAST_NOTIFIED_REVIEW_DATE: &str = "last_notified_review_date";
const NOTIFICATION_SET: &str = "notification_set";
const NEXT_REVIEWS_AT: &str = "next_reviews_at";

/// Free accounts are limited to the first three levels.
pub const DEFAULT_MAX_LEVEL_GRANTED: i32 = 3;

/// Stateless accessors over the `properties` table.
pub struct Properties;

impl Properties {
    pub fn get_raw(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
        let value = conn
            .query_row(
                "SELECT value FROM properties WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_raw(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO properties (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete(conn: &Connection, key: &str) -> Result<(), StoreError> {
        conn.execute("DELETE FROM properties WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn get_bool(conn: &Connection, key: &str) -> Result<bool, StoreError> {
        Ok(Self::get_raw(conn, key)?.is_some_and(|v| v == "true"))
    }

    fn set_bool(conn: &Connection, key: &str, value: bool) -> Result<(), StoreError> {
        Self::set_raw(conn, key, if value { "true" } else { "false" })
    }

    fn get_i32(conn: &Connection, key: &str) -> Result<Option<i32>, StoreError> {
        Self::get_raw(conn, key)?
            .map(|v| {
                v.parse::<i32>()
                    .map_err(|e| StoreError::corrupt("properties", format!("{key}: {e}")))
            })
            .transpose()
    }

    fn get_time(conn: &Connection, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(raw) = Self::get_raw(conn, key)? else {
            return Ok(None);
        };
        let ms = raw
            .parse::<i64>()
            .map_err(|e| StoreError::corrupt("properties", format!("{key}: {e}")))?;
        from_millis(ms)
            .map(Some)
            .ok_or_else(|| StoreError::corrupt("properties", format!("{key}: out of range")))
    }

    fn set_time(conn: &Connection, key: &str, t: DateTime<Utc>) -> Result<(), StoreError> {
        Self::set_raw(conn, key, &to_millis(t).to_string())
    }

    // --- credentials / api flags -------------------------------------------

    pub fn api_token(conn: &Connection) -> Result<Option<String>, StoreError> {
        Ok(Self::get_raw(conn, API_TOKEN)?.filter(|t| !t.trim().is_empty()))
    }

    pub fn set_api_token(conn: &Connection, token: Option<&str>) -> Result<(), StoreError> {
        match token {
            Some(t) => Self::set_raw(conn, API_TOKEN, t),
            None => Self::delete(conn, API_TOKEN),
        }
    }

    pub fn api_key_rejected(conn: &Connection) -> Result<bool, StoreError> {
        Self::get_bool(conn, API_KEY_REJECTED)
    }

    pub fn set_api_key_rejected(conn: &Connection, value: bool) -> Result<(), StoreError> {
        Self::set_bool(conn, API_KEY_REJECTED, value)
    }

    pub fn api_in_error(conn: &Connection) -> Result<bool, StoreError> {
        Self::get_bool(conn, API_IN_ERROR)
    }

    pub fn set_api_in_error(conn: &Connection, value: bool) -> Result<(), StoreError> {
        Self::set_bool(conn, API_IN_ERROR, value)
    }

    pub fn user_refresh_required(conn: &Connection) -> Result<bool, StoreError> {
        Self::get_bool(conn, USER_REFRESH_REQUIRED)
    }

    pub fn set_user_refresh_required(conn: &Connection, value: bool) -> Result<(), StoreError> {
        Self::set_bool(conn, USER_REFRESH_REQUIRED, value)
    }

    // --- user ---------------------------------------------------------------

    pub fn user_level(conn: &Connection) -> Result<i32, StoreError> {
        Ok(Self::get_i32(conn, USER_LEVEL)?.unwrap_or(0))
    }

    pub fn set_user_level(conn: &Connection, level: i32) -> Result<(), StoreError> {
        Self::set_raw(conn, USER_LEVEL, &level.to_string())
    }

    pub fn max_level_granted(conn: &Connection) -> Result<i32, StoreError> {
        Ok(Self::get_i32(conn, MAX_LEVEL_GRANTED)?.unwrap_or(DEFAULT_MAX_LEVEL_GRANTED))
    }

    pub fn set_max_level_granted(conn: &Connection, level: i32) -> Result<(), StoreError> {
        Self::set_raw(conn, MAX_LEVEL_GRANTED, &level.to_string())
    }

    pub fn vacation_mode(conn: &Connection) -> Result<bool, StoreError> {
        Self::get_bool(conn, VACATION_MODE)
    }

    pub fn set_vacation_mode(conn: &Connection, value: bool) -> Result<(), StoreError> {
        Self::set_bool(conn, VACATION_MODE, value)
    }

    pub fn username(conn: &Connection) -> Result<Option<String>, StoreError> {
        Self::get_raw(conn, USERNAME)
    }

    pub fn set_username(conn: &Connection, name: &str) -> Result<(), StoreError> {
        Self::set_raw(conn, USERNAME, name)
    }

    // --- sync bookkeeping ---------------------------------------------------

    pub fn last_sync_success(
        conn: &Connection,
        resource: ResourceKind,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Self::get_time(conn, &sync_key(resource))
    }

    /// Never moves the timestamp backwards.
    pub fn set_last_sync_success(
        conn: &Connection,
        resource: ResourceKind,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let key = sync_key(resource);
        let next = match Self::get_time(conn, &key)? {
            Some(existing) if existing > at => existing,
            _ => at,
        };
        Self::set_time(conn, &key, next)?;
        Ok(next)
    }

    pub fn clear_sync_state(conn: &Connection) -> Result<(), StoreError> {
        for resource in ResourceKind::ALL {
            Self::delete(conn, &sync_key(resource))?;
        }
        Ok(())
    }

    pub fn last_api_success(conn: &Connection) -> Result<Option<DateTime<Utc>>, StoreError> {
        Self::get_time(conn, LAST_API_SUCCESS)
    }

    pub fn set_last_api_success(conn: &Connection, at: DateTime<Utc>) -> Result<(), StoreError> {
        Self::set_time(conn, LAST_API_SUCCESS, at)
    }

    pub fn last_background_sync(conn: &Connection) -> Result<Option<DateTime<Utc>>, StoreError> {
        Self::get_time(conn, LAST_BACKGROUND_SYNC)
    }

    pub fn set_last_background_sync(
        conn: &Connection,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Self::set_time(conn, LAST_BACKGROUND_SYNC, at)
    }

    pub fn first_time_setup(conn: &Connection) -> Result<bool, StoreError> {
        Self::get_bool(conn, FIRST_TIME_SETUP)
    }

    pub fn set_first_time_setup(conn: &Connection, value: bool) -> Result<(), StoreError> {
        Self::set_bool(conn, FIRST_TIME_SETUP, value)
    }

    // --- notifications ------------------------------------------------------

    pub fn last_notified_review_date(
        conn: &Connection,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Self::get_time(conn, LAST_NOTIFIED_REVIEW_DATE)
    }

    pub fn set_last_notified_review_date(
        conn: &Connection,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Self::set_time(conn, LAST_NOTIFIED_REVIEW_DATE, at)
    }

    pub fn notification_set(conn: &Connection) -> Result<bool, StoreError> {
        Self::get_bool(conn, NOTIFICATION_SET)
    }

    pub fn set_notification_set(conn: &Connection, value: bool) -> Result<(), StoreError> {
        Self::set_bool(conn, NOTIFICATION_SET, value)
    }

    pub fn next_reviews_at(conn: &Connection) -> Result<Option<DateTime<Utc>>, StoreError> {
        Self::get_time(conn, NEXT_REVIEWS_AT)
    }

    pub fn set_next_reviews_at(
        conn: &Connection,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        match at {
            Some(t) => Self::set_time(conn, NEXT_REVIEWS_AT, t),
            None => Self::delete(conn, NEXT_REVIEWS_AT),
        }
    }
}

fn sync_key(resource: ResourceKind) -> String {
    format!("last_sync_success.{}", resource.as_str())
}

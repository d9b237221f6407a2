//! ApiStateMachine - API 全体の健全性
//!
//! 状態は永続化されたフラグから毎回計算し直す（状態そのものは保存しない）。
//! 変化したときだけ `LiveValue` に publish する。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::domain::{ApiState, ResourceKind};
use crate::error::StoreError;
use crate::observable::LiveValue;
use crate::ports::Clock;
use crate::store::{Database, Properties};

/// Stored inputs of the evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiFlags {
    pub has_token: bool,
    pub rejected: bool,
    pub in_error: bool,
    pub refresh_required: bool,
    pub profile_synced_at: Option<DateTime<Utc>>,
}

impl ApiFlags {
    pub fn load(conn: &Connection) -> Result<Self, StoreError> {
        Ok(Self {
            has_token: Properties::api_token(conn)?.is_some(),
            rejected: Properties::api_key_rejected(conn)?,
            in_error: Properties::api_in_error(conn)?,
            refresh_required: Properties::user_refresh_required(conn)?,
            profile_synced_at: Properties::last_sync_success(conn, ResourceKind::Profile)?,
        })
    }

    /// First match wins.
    pub fn state_at(&self, now: DateTime<Utc>) -> ApiState {
        if !self.has_token {
            ApiState::Unconfigured
        } else if self.rejected {
            ApiState::CredentialsRejected
        } else if self.in_error {
            ApiState::TransientError
        } else if self.refresh_required || ResourceKind::Profile.is_due(now, self.profile_synced_at)
        {
            ApiState::NeedsRefresh
        } else {
            ApiState::Ok
        }
    }
}

pub struct ApiStateMachine {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    live: Arc<LiveValue<ApiState>>,
}

impl ApiStateMachine {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            live: Arc::new(LiveValue::new(ApiState::Unknown)),
        }
    }

    pub fn live(&self) -> Arc<LiveValue<ApiState>> {
        Arc::clone(&self.live)
    }

    /// Last published state. `Unknown` until the first `evaluate`.
    pub fn current(&self) -> ApiState {
        *self.live.get()
    }

    /// Recompute from stored flags; publish only on change.
    pub fn evaluate(&self) -> Result<ApiState, StoreError> {
        let flags = self.db.with_conn(ApiFlags::load)?;
        let state = flags.state_at(self.clock.now());
        let previous = self.current();
        if self.live.publish_if_changed(state) {
            info!(from = %previous, to = %state, "api state changed");
        }
        Ok(state)
    }

    /// User-initiated retry: forget errors and force a profile refresh.
    pub fn clear_error(&self) -> Result<ApiState, StoreError> {
        self.db.transaction(|conn| {
            Properties::set_api_key_rejected(conn, false)?;
            Properties::set_api_in_error(conn, false)?;
            Properties::set_user_refresh_required(conn, true)
        })?;
        self.evaluate()
    }

    pub fn mark_rejected(&self) -> Result<ApiState, StoreError> {
        self.db
            .with_conn(|conn| Properties::set_api_key_rejected(conn, true))?;
        self.evaluate()
    }

    pub fn mark_in_error(&self) -> Result<ApiState, StoreError> {
        self.db
            .with_conn(|conn| Properties::set_api_in_error(conn, true))?;
        self.evaluate()
    }

    /// Store new credentials. Previous rejection and error flags no longer apply.
    pub fn set_credentials(&self, token: &str) -> Result<ApiState, StoreError> {
        self.db.transaction(|conn| {
            Properties::set_api_token(conn, Some(token))?;
            Properties::set_api_key_rejected(conn, false)?;
            Properties::set_api_in_error(conn, false)?;
            Properties::set_user_refresh_required(conn, true)
        })?;
        self.evaluate()
    }

    pub fn clear_credentials(&self) -> Result<ApiState, StoreError> {
        self.db.transaction(|conn| {
            Properties::set_api_token(conn, None)?;
            Properties::set_api_key_rejected(conn, false)?;
            Properties::set_api_in_error(conn, false)
        })?;
        self.evaluate()
    }
}

//! SyncService - 「assert + drain」を 1 本の入口にまとめる
//!
//! # 設計
//! - 外部トリガー（ユーザー操作、接続復帰、アラーム、定期 tick）はすべてここを通る
//! - 1 permit の `Semaphore` で同時実行を 1 つに絞る。走っている間に来たトリガーは
//!   待たずに `Coalesced` を返す（後から来た方は捨ててよい）

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::api_state::ApiStateMachine;
use super::runner::{ApiTaskRunner, DrainReport};
use super::staleness::{AssertReport, StalenessPolicy};
use super::timeline::TimeLineProjector;
use crate::config::SyncConfig;
use crate::domain::{ApiState, TimeLine, top_of_hour};
use crate::error::SyncError;
use crate::ports::{Clock, Connectivity, PowerState};
use crate::queue::PersistentTaskQueue;
use crate::store::{Database, Properties, TaskDefinitionRepository};

/// Where a sync request came from. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    User,
    Connectivity,
    Alarm,
    Housekeeping,
    Startup,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerSource::User => "user",
            TriggerSource::Connectivity => "connectivity",
            TriggerSource::Alarm => "alarm",
            TriggerSource::Housekeeping => "housekeeping",
            TriggerSource::Startup => "startup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BackgroundSyncDisabled,
    PowerSave,
    AlreadyRanThisHour,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub assert: AssertReport,
    pub drain: DrainReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another assert + drain was already running.
    Coalesced,
    /// Host is idle and tasks are pending; try again on the next alarm.
    Deferred { assert: AssertReport },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HouseKeeping {
    pub assert: AssertReport,
    pub first_time_setup_done: bool,
    pub time_line_recomputed: bool,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub background_sync: bool,
    pub offline_settle: Duration,
    pub background_min_interval: Duration,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            background_sync: config.background_sync,
            offline_settle: config.offline_settle(),
            background_min_interval: config.background_min_interval(),
        }
    }
}

pub struct SyncService {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    queue: Arc<PersistentTaskQueue>,
    staleness: Arc<StalenessPolicy>,
    runner: Arc<ApiTaskRunner>,
    api_state: Arc<ApiStateMachine>,
    projector: Arc<TimeLineProjector>,
    connectivity: Arc<dyn Connectivity>,
    power: Arc<dyn PowerState>,
    settings: SyncSettings,
    gate: Semaphore,
}

impl SyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        queue: Arc<PersistentTaskQueue>,
        staleness: Arc<StalenessPolicy>,
        runner: Arc<ApiTaskRunner>,
        api_state: Arc<ApiStateMachine>,
        projector: Arc<TimeLineProjector>,
        connectivity: Arc<dyn Connectivity>,
        power: Arc<dyn PowerState>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            db,
            clock,
            queue,
            staleness,
            runner,
            api_state,
            projector,
            connectivity,
            power,
            settings,
            gate: Semaphore::new(1),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Assert due tasks, then drain. Coalesced if a run is already in progress.
    pub async fn trigger(
        &self,
        source: TriggerSource,
        min_interval: Duration,
    ) -> Result<SyncOutcome, SyncError> {
        let Ok(_permit) = self.gate.try_acquire() else {
            debug!(%source, "sync already running, coalesced");
            return Ok(SyncOutcome::Coalesced);
        };
        info!(%source, "sync started");
        let assert = self
            .staleness
            .assert_due_tasks(self.clock.now(), min_interval)?;
        let drain = self.runner.drain().await?;
        info!(%source, succeeded = drain.succeeded(), "sync finished");
        Ok(SyncOutcome::Completed(SyncReport { assert, drain }))
    }

    /// User-initiated retry: clear the error state and backoff, then sync.
    pub async fn retry(&self) -> Result<SyncOutcome, SyncError> {
        let state = self.api_state.clear_error()?;
        self.runner.reset_backoff();
        info!(%state, "error state cleared by user");
        self.trigger(TriggerSource::User, Duration::ZERO).await
    }

    /// Periodic background alarm.
    pub async fn process_background_alarm(&self) -> Result<SyncOutcome, SyncError> {
        if !self.settings.background_sync {
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::BackgroundSyncDisabled,
            });
        }
        if self.power.is_power_save() {
            info!("power save mode, background sync skipped");
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::PowerSave,
            });
        }

        let hour = top_of_hour(self.clock.now());
        let last = self.db.with_conn(Properties::last_background_sync)?;
        if last == Some(hour) {
            debug!(%hour, "background sync already ran this hour");
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::AlreadyRanThisHour,
            });
        }

        let Ok(_permit) = self.gate.try_acquire() else {
            debug!(source = %TriggerSource::Alarm, "sync already running, coalesced");
            return Ok(SyncOutcome::Coalesced);
        };
        info!(state = %self.api_state.current(), online = %self.connectivity.status(), "background sync started");
        self.db
            .with_conn(|conn| Properties::set_last_background_sync(conn, hour))?;

        if !self.connectivity.status().is_online() {
            debug!("offline, waiting for connectivity to settle");
            tokio::time::sleep(self.settings.offline_settle).await;
        }
        if self.api_state.evaluate()? == ApiState::TransientError {
            self.db
                .with_conn(|conn| Properties::set_api_in_error(conn, false))?;
            self.api_state.evaluate()?;
        }

        let assert = self
            .staleness
            .assert_due_tasks(self.clock.now(), self.settings.background_min_interval)?;
        if self.power.is_idle() && !self.queue.is_empty()? {
            info!("host idle with pending tasks, deferring");
            return Ok(SyncOutcome::Deferred { assert });
        }
        let drain = self.runner.drain().await?;
        info!(succeeded = drain.succeeded(), "background sync finished");
        Ok(SyncOutcome::Completed(SyncReport { assert, drain }))
    }

    /// Minute tick: keep the queue asserted and the time line current.
    pub fn house_keeping(&self, now: DateTime<Utc>) -> Result<HouseKeeping, SyncError> {
        let assert = self
            .staleness
            .assert_due_tasks(now, self.settings.background_min_interval)?;
        let first_time_setup_done = self.db.transaction(|conn| {
            if Properties::first_time_setup(conn)? {
                return Ok(false);
            }
            if TaskDefinitionRepository::count(conn)? > 0 {
                return Ok(false);
            }
            Properties::set_first_time_setup(conn, true)?;
            Ok(true)
        })?;
        if first_time_setup_done {
            info!("first time setup complete");
        }
        let time_line_recomputed = self.projector.on_tick(now)?;
        Ok(HouseKeeping {
            assert,
            first_time_setup_done,
            time_line_recomputed,
        })
    }

    /// Notification alarm: rebuild the time line so observers (notifications
    /// included) see current counts.
    pub fn process_notification_alarm(&self) -> Result<Arc<TimeLine>, SyncError> {
        Ok(self.projector.recompute(self.clock.now())?)
    }
}

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use studysync_core::config::SyncConfig;
use studysync_core::domain::{OnlineStatus, ResourceKind};
use studysync_core::ports::{FixedClock, ManualConnectivity, Page};
use studysync_core::store::{Database, Properties};
use studysync_core::testing::{FakeApiClient, FakePower, RecordingNotifier, record};
use studysync_core::{Engine, EngineBuilder};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
}

pub struct Harness {
    pub engine: Engine,
    pub db: Arc<Database>,
    pub api: Arc<FakeApiClient>,
    pub clock: Arc<FixedClock>,
    pub net: Arc<ManualConnectivity>,
    pub power: Arc<FakePower>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    harness_with(SyncConfig::default(), OnlineStatus::Unmetered)
}

pub fn harness_with(config: SyncConfig, online: OnlineStatus) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let api = Arc::new(FakeApiClient::new());
    let clock = Arc::new(FixedClock::new(now()));
    let net = Arc::new(ManualConnectivity::new(online));
    let power = Arc::new(FakePower::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = EngineBuilder::new(config)
        .database(db.clone())
        .api_client(api.clone())
        .clock(clock.clone())
        .connectivity(net.clone())
        .power(power.clone())
        .notifier(notifier.clone())
        .build()
        .unwrap();
    Harness {
        engine,
        db,
        api,
        clock,
        net,
        power,
        notifier,
    }
}

impl Harness {
    /// Credentials stored and every resource synced at `at`, except the
    /// `older` overrides.
    pub fn synced(&self, at: DateTime<Utc>, older: &[(ResourceKind, DateTime<Utc>)]) {
        self.db
            .transaction(|conn| {
                Properties::set_api_token(conn, Some("token"))?;
                for resource in ResourceKind::ALL {
                    let when = older
                        .iter()
                        .find(|(r, _)| *r == resource)
                        .map_or(at, |(_, t)| *t);
                    Properties::set_last_sync_success(conn, resource, when)?;
                }
                Ok(())
            })
            .unwrap();
        self.engine.api_state_machine().evaluate().unwrap();
    }

    pub fn last_success(&self, resource: ResourceKind) -> Option<DateTime<Utc>> {
        self.db
            .with_conn(|conn| Properties::last_sync_success(conn, resource))
            .unwrap()
    }
}

pub fn assignment(id: i64, subject_id: i64, stage: i32, available_at: Option<DateTime<Utc>>) -> Value {
    record(
        id,
        "assignment",
        json!({
            "subject_id": subject_id,
            "subject_type": "kanji",
            "srs_stage": stage,
            "unlocked_at": "2024-02-01T00:00:00Z",
            "started_at": "2024-02-01T00:00:00Z",
            "available_at": available_at,
        }),
    )
}

pub fn user(level: i32) -> Page {
    Page::last(vec![json!({
        "object": "user",
        "data_updated_at": "2024-03-01T00:00:00Z",
        "data": {
            "username": "kani",
            "level": level,
            "subscription": {"max_level_granted": 60},
        },
    })])
}

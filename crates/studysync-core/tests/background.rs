//! Background alarm, housekeeping and the worker loops.

mod common;

use std::time::Duration;

use chrono::TimeDelta;
use common::{harness, harness_with, now};
use studysync_core::app::{SkipReason, SyncOutcome, WorkerSettings};
use studysync_core::config::SyncConfig;
use studysync_core::domain::{ApiState, OnlineStatus, ResourceKind, TaskKind};
use studysync_core::store::Properties;

#[tokio::test]
async fn background_alarm_runs_once_per_hour() {
    let h = harness();
    h.synced(now(), &[(ResourceKind::Summary, now() - TimeDelta::hours(2))]);

    let first = h.engine.sync().process_background_alarm().await.unwrap();
    assert!(matches!(first, SyncOutcome::Completed(_)));
    assert_eq!(h.api.paths(), vec!["/summary".to_string()]);

    h.clock.advance(TimeDelta::minutes(20));
    let second = h.engine.sync().process_background_alarm().await.unwrap();
    assert_eq!(
        second,
        SyncOutcome::Skipped {
            reason: SkipReason::AlreadyRanThisHour
        }
    );

    // 13:10 is a new hour
    h.clock.advance(TimeDelta::minutes(20));
    let third = h.engine.sync().process_background_alarm().await.unwrap();
    assert!(matches!(third, SyncOutcome::Completed(_)));
}

#[tokio::test]
async fn power_save_skips_the_background_alarm() {
    let h = harness();
    h.synced(now() - TimeDelta::days(2), &[]);
    h.power.set_power_save(true);

    let outcome = h.engine.sync().process_background_alarm().await.unwrap();

    assert_eq!(
        outcome,
        SyncOutcome::Skipped {
            reason: SkipReason::PowerSave
        }
    );
    assert!(h.engine.queue().is_empty().unwrap());
    let last = h.db.with_conn(Properties::last_background_sync).unwrap();
    assert_eq!(last, None);
}

#[tokio::test]
async fn idle_host_defers_pending_tasks() {
    let h = harness();
    h.synced(now(), &[(ResourceKind::Assignments, now() - TimeDelta::hours(3))]);
    h.power.set_idle(true);

    let outcome = h.engine.sync().process_background_alarm().await.unwrap();

    match outcome {
        SyncOutcome::Deferred { assert } => {
            assert_eq!(assert.enqueued, vec![TaskKind::GetAssignments]);
        }
        other => panic!("expected deferral, got {other:?}"),
    }
    assert_eq!(h.api.call_count(), 0);
    assert!(h.engine.queue().has_pending(TaskKind::GetAssignments).unwrap());
}

#[tokio::test]
async fn background_alarm_clears_transient_error() {
    let h = harness();
    h.synced(now(), &[]);
    h.db.with_conn(|conn| Properties::set_api_in_error(conn, true))
        .unwrap();
    assert_eq!(
        h.engine.api_state_machine().evaluate().unwrap(),
        ApiState::TransientError
    );

    h.engine.sync().process_background_alarm().await.unwrap();

    assert_eq!(*h.engine.api_state().get(), ApiState::Ok);
}

#[tokio::test]
async fn background_sync_can_be_disabled() {
    let config = SyncConfig {
        background_sync: false,
        ..SyncConfig::default()
    };
    let h = harness_with(config, OnlineStatus::Unmetered);
    let outcome = h.engine.sync().process_background_alarm().await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Skipped {
            reason: SkipReason::BackgroundSyncDisabled
        }
    );
}

#[tokio::test]
async fn housekeeping_marks_first_time_setup_once_queue_is_empty() {
    let h = harness();
    h.synced(now(), &[]);
    h.engine.queue().enqueue(TaskKind::GetSummary, "").unwrap();

    let report = h.engine.sync().house_keeping(now()).unwrap();
    assert!(!report.first_time_setup_done);
    assert!(report.time_line_recomputed);

    h.engine.runner().drain().await.unwrap();
    let report = h.engine.sync().house_keeping(now()).unwrap();
    assert!(report.first_time_setup_done);
    assert!(h.db.with_conn(Properties::first_time_setup).unwrap());

    let report = h.engine.sync().house_keeping(now()).unwrap();
    assert!(!report.first_time_setup_done);
}

#[tokio::test]
async fn worker_drains_when_connectivity_returns() {
    let config = SyncConfig {
        background_sync: false,
        ..SyncConfig::default()
    };
    let h = harness_with(config, OnlineStatus::NoConnection);
    h.synced(now(), &[(ResourceKind::Summary, now() - TimeDelta::hours(2))]);

    let worker = h.engine.spawn_worker(WorkerSettings {
        tick: Duration::from_secs(3600),
        sync_on_start: true,
    });

    // the startup sync only queues while offline
    for _ in 0..50 {
        if h.engine.queue().has_pending(TaskKind::GetSummary).unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.api.call_count(), 0);

    h.net.set(OnlineStatus::Unmetered);
    for _ in 0..100 {
        if h.engine.queue().is_empty().unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h.engine.queue().is_empty().unwrap());
    assert_eq!(h.api.paths(), vec!["/summary".to_string()]);
    worker.shutdown_and_join().await;
}

#[tokio::test]
async fn user_trigger_through_the_worker_handle() {
    let h = harness();
    h.synced(now(), &[(ResourceKind::Summary, now() - TimeDelta::hours(2))]);
    let worker = h.engine.spawn_worker(WorkerSettings {
        tick: Duration::from_secs(3600),
        sync_on_start: false,
    });

    assert!(worker.trigger().request(studysync_core::app::TriggerSource::User));
    for _ in 0..100 {
        if h.api.call_count() > 0 && h.engine.queue().is_empty().unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(h.last_success(ResourceKind::Summary), Some(now()));
    worker.shutdown_and_join().await;
}

//! End-to-end scenarios through the public engine API.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::TimeDelta;
use common::{assignment, harness, now, user};
use studysync_core::app::{DrainStop, SyncOutcome, TriggerSource};
use studysync_core::domain::{ApiState, ResourceKind, TaskKind, TaskOutcome};
use studysync_core::error::ApiError;
use studysync_core::ports::Page;
use studysync_core::store::{Properties, SubjectRepository};
use studysync_core::testing::Notification;

fn completed(outcome: SyncOutcome) -> studysync_core::app::SyncReport {
    match outcome {
        SyncOutcome::Completed(report) => report,
        other => panic!("expected a completed sync, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_assignments_are_fetched_and_cursor_advances() {
    let h = harness();
    h.synced(now(), &[(ResourceKind::Assignments, now() - TimeDelta::hours(2))]);
    h.api.push_page(
        "/assignments",
        Page::last(vec![
            assignment(1, 10, 1, Some(now() + TimeDelta::hours(2))),
            assignment(2, 11, 2, Some(now() + TimeDelta::hours(3))),
            assignment(3, 12, 3, Some(now() + TimeDelta::hours(4))),
        ]),
    );

    let report = completed(
        h.engine
            .sync()
            .trigger(TriggerSource::User, Duration::ZERO)
            .await
            .unwrap(),
    );

    assert_eq!(report.assert.enqueued, vec![TaskKind::GetAssignments]);
    assert_eq!(report.drain.stop, DrainStop::Idle);
    assert!(h.engine.queue().is_empty().unwrap());
    assert_eq!(h.last_success(ResourceKind::Assignments), Some(now()));

    // the cursor overlaps the previous sync by an hour
    let calls = h.api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].updated_after, Some(now() - TimeDelta::hours(3)));

    let count = h.db.with_conn(SubjectRepository::count).unwrap();
    assert_eq!(count, 3);
    assert_eq!(h.engine.time_line().get().num_upcoming(), 3);
}

#[tokio::test]
async fn asserting_twice_enqueues_no_duplicates() {
    let h = harness();
    h.synced(now() - TimeDelta::days(30), &[]);
    h.net.set(studysync_core::domain::OnlineStatus::NoConnection);

    let first = completed(
        h.engine
            .sync()
            .trigger(TriggerSource::User, Duration::ZERO)
            .await
            .unwrap(),
    );
    let second = completed(
        h.engine
            .sync()
            .trigger(TriggerSource::User, Duration::ZERO)
            .await
            .unwrap(),
    );

    assert_eq!(first.assert.enqueued.len(), ResourceKind::ALL.len());
    assert!(second.assert.enqueued.is_empty());
    assert_eq!(second.drain.stop, DrainStop::Offline);
    assert_eq!(h.engine.queue().count().unwrap(), ResourceKind::ALL.len());
    assert_eq!(h.api.call_count(), 0);
}

#[tokio::test]
async fn rejected_credentials_make_no_calls_until_retry() {
    let h = harness();
    h.synced(now(), &[]);
    h.engine.queue().enqueue(TaskKind::GetSummary, "").unwrap();
    h.db.with_conn(|conn| Properties::set_api_key_rejected(conn, true))
        .unwrap();

    let report = completed(
        h.engine
            .sync()
            .trigger(TriggerSource::Alarm, Duration::ZERO)
            .await
            .unwrap(),
    );
    assert_eq!(
        report.drain.stop,
        DrainStop::Halted {
            state: ApiState::CredentialsRejected
        }
    );
    assert_eq!(h.api.call_count(), 0);

    h.api.push_page("/user", user(5));
    let report = completed(h.engine.sync().retry().await.unwrap());

    assert_eq!(h.api.paths()[0], "/user");
    assert!(report.drain.executed.iter().all(|(_, o)| o.is_success()));
    assert_eq!(*h.engine.api_state().get(), ApiState::Ok);
    assert!(h.engine.queue().is_empty().unwrap());
}

#[tokio::test]
async fn transient_failure_leaves_sync_state_untouched() {
    let h = harness();
    let before = now() - TimeDelta::hours(2);
    h.synced(now(), &[(ResourceKind::Summary, before)]);
    h.api
        .push_error("/summary", ApiError::Transient("502 bad gateway".into()));

    let report = completed(
        h.engine
            .sync()
            .trigger(TriggerSource::User, Duration::ZERO)
            .await
            .unwrap(),
    );

    assert!(matches!(
        report.drain.executed.as_slice(),
        [(TaskKind::GetSummary, TaskOutcome::Retryable { .. })]
    ));
    assert!(h.engine.queue().has_pending(TaskKind::GetSummary).unwrap());
    assert_eq!(h.last_success(ResourceKind::Summary), Some(before));

    // next trigger after the backoff succeeds
    h.clock.advance(TimeDelta::seconds(10));
    let report = completed(
        h.engine
            .sync()
            .trigger(TriggerSource::User, Duration::ZERO)
            .await
            .unwrap(),
    );
    assert_eq!(report.drain.succeeded(), 1);
    assert_eq!(
        h.last_success(ResourceKind::Summary),
        Some(now() + TimeDelta::seconds(10))
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_are_coalesced() {
    let h = harness();
    h.synced(now(), &[(ResourceKind::Summary, now() - TimeDelta::hours(2))]);
    h.api.set_delay(Duration::from_millis(200));

    let sync = h.engine.sync();
    let (a, b) = tokio::join!(
        sync.trigger(TriggerSource::User, Duration::ZERO),
        sync.trigger(TriggerSource::Connectivity, Duration::ZERO),
    );

    assert!(matches!(a.unwrap(), SyncOutcome::Completed(_)));
    assert_eq!(b.unwrap(), SyncOutcome::Coalesced);
    assert_eq!(h.api.call_count(), 1);
}

#[tokio::test]
async fn observers_see_the_new_time_line_and_a_notification_is_posted() {
    let h = harness();
    h.synced(now(), &[(ResourceKind::Assignments, now() - TimeDelta::hours(2))]);
    h.api.push_page(
        "/assignments",
        Page::last(vec![
            assignment(1, 10, 1, Some(now() - TimeDelta::minutes(5))),
            assignment(2, 11, 4, Some(now() - TimeDelta::minutes(1))),
        ]),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.engine
        .time_line()
        .observe(move |tl| sink.lock().unwrap().push(tl.available_reviews.len()));

    h.engine
        .sync()
        .trigger(TriggerSource::User, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0, 2]);
    assert_eq!(
        h.notifier.events(),
        vec![Notification::Posted {
            lessons: 0,
            reviews: 2,
            new_reviews: 2
        }]
    );
}

#[tokio::test]
async fn malformed_records_are_skipped_not_fatal() {
    let h = harness();
    h.synced(now(), &[(ResourceKind::Assignments, now() - TimeDelta::hours(2))]);
    h.api.push_page(
        "/assignments",
        Page::last(vec![
            assignment(1, 10, 1, None),
            serde_json::json!({"id": 2, "object": "assignment", "data": {"srs_stage": "x"}}),
        ]),
    );

    let report = completed(
        h.engine
            .sync()
            .trigger(TriggerSource::User, Duration::ZERO)
            .await
            .unwrap(),
    );

    assert_eq!(
        report.drain.executed,
        vec![(
            TaskKind::GetAssignments,
            TaskOutcome::Succeeded {
                applied: 1,
                skipped: 1
            }
        )]
    );
    assert_eq!(h.last_success(ResourceKind::Assignments), Some(now()));
}

#[tokio::test]
async fn reapplying_the_same_page_is_idempotent() {
    let h = harness();
    h.synced(now(), &[]);
    let page = Page::last(vec![assignment(1, 10, 2, Some(now() + TimeDelta::hours(1)))]);
    h.api.push_page("/assignments", page.clone());
    h.api.push_page("/assignments", page);

    for _ in 0..2 {
        h.engine.queue().enqueue(TaskKind::GetAssignments, "").unwrap();
        h.engine.runner().drain().await.unwrap();
    }

    let row = h
        .db
        .with_conn(|conn| SubjectRepository::get(conn, 10))
        .unwrap()
        .unwrap();
    assert_eq!(row.srs_stage, Some(2));
    assert_eq!(h.db.with_conn(SubjectRepository::count).unwrap(), 1);
}

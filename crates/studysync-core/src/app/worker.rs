//! BackgroundWorker - 外部トリガーを受けて sync を回す常駐タスク群
//!
//! - sync ループ: mpsc で届いたトリガーを 1 つずつ処理。溜まっていた分はまとめて 1 回にする
//! - 接続ウォッチャー: オフライン -> オンラインの遷移でトリガーを投げる
//! - tick ループ: 毎分 housekeeping、毎時 background alarm
//!
//! `shutdown_tx` に true を送ると全ループが止まる。実行中の drain は中断しない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::sync::{SyncOutcome, SyncService, TriggerSource};
use crate::ports::{Clock, Connectivity};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Housekeeping / alarm period.
    pub tick: Duration,
    /// Run one sync as soon as the worker starts.
    pub sync_on_start: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            sync_on_start: true,
        }
    }
}

/// Cheap handle for posting sync requests.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<TriggerSource>,
}

impl TriggerHandle {
    /// Post a request. Returns false when one is already pending, which then
    /// covers this request too.
    pub fn request(&self, source: TriggerSource) -> bool {
        match self.tx.try_send(source) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%source, "sync request already pending, coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Worker group handle.
pub struct BackgroundWorker {
    shutdown_tx: watch::Sender<bool>,
    trigger: TriggerHandle,
    joins: Vec<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn spawn(
        sync: Arc<SyncService>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // capacity 1: a second request while one is pending is the same request
        let (tx, rx) = mpsc::channel(1);
        let trigger = TriggerHandle { tx };

        if settings.sync_on_start {
            trigger.request(TriggerSource::Startup);
        }

        let joins = vec![
            tokio::spawn(sync_loop(Arc::clone(&sync), rx, shutdown_rx.clone())),
            tokio::spawn(connectivity_loop(
                connectivity,
                trigger.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(tick_loop(
                sync,
                clock,
                trigger.clone(),
                settings.tick,
                shutdown_rx,
            )),
        ];

        Self {
            shutdown_tx,
            trigger,
            joins,
        }
    }

    pub fn trigger(&self) -> TriggerHandle {
        self.trigger.clone()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}

async fn sync_loop(
    sync: Arc<SyncService>,
    mut rx: mpsc::Receiver<TriggerSource>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let source = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            source = rx.recv() => match source {
                Some(source) => source,
                None => break,
            },
        };
        // anything that queued up meanwhile is covered by this run
        while let Ok(extra) = rx.try_recv() {
            debug!(source = %extra, "coalesced into pending sync");
        }

        match sync.trigger(source, Duration::ZERO).await {
            Ok(SyncOutcome::Completed(report)) => {
                debug!(%source, stop = ?report.drain.stop, "triggered sync done");
            }
            Ok(other) => debug!(%source, outcome = ?other, "triggered sync not run"),
            Err(e) => error!(%source, error = %e, "triggered sync failed"),
        }
    }
    debug!("sync loop stopped");
}

async fn connectivity_loop(
    connectivity: Arc<dyn Connectivity>,
    trigger: TriggerHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut status_rx = connectivity.subscribe();
    let mut online = status_rx.borrow_and_update().is_online();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let status = *status_rx.borrow_and_update();
        let now_online = status.is_online();
        if now_online && !online {
            info!(%status, "connectivity restored");
            trigger.request(TriggerSource::Connectivity);
        }
        online = now_online;
    }
    debug!("connectivity loop stopped");
}

async fn tick_loop(
    sync: Arc<SyncService>,
    clock: Arc<dyn Clock>,
    trigger: TriggerHandle,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = interval.tick() => {}
        }

        match sync.house_keeping(clock.now()) {
            Ok(report) if !report.assert.enqueued.is_empty() && report.assert.can_trigger() => {
                trigger.request(TriggerSource::Housekeeping);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "housekeeping failed"),
        }
        match sync.process_background_alarm().await {
            Ok(SyncOutcome::Completed(report)) => {
                debug!(stop = ?report.drain.stop, "background alarm processed");
            }
            Ok(other) => debug!(outcome = ?other, "background alarm not run"),
            Err(e) => warn!(error = %e, "background alarm failed"),
        }
    }
    debug!("tick loop stopped");
}

//! Connectivity / power state of the host.

use tokio::sync::watch;

use crate::domain::OnlineStatus;

/// 現在の接続状態と、その変化を流す watch channel を提供する。
pub trait Connectivity: Send + Sync {
    fn status(&self) -> OnlineStatus;

    fn subscribe(&self) -> watch::Receiver<OnlineStatus>;
}

/// Connectivity driven by explicit `set` calls (CLI, tests).
pub struct ManualConnectivity {
    tx: watch::Sender<OnlineStatus>,
}

impl ManualConnectivity {
    pub fn new(initial: OnlineStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a new status. Receivers are only woken on an actual change.
    pub fn set(&self, status: OnlineStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

impl Connectivity for ManualConnectivity {
    fn status(&self) -> OnlineStatus {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<OnlineStatus> {
        self.tx.subscribe()
    }
}

/// Host power hints used by background processing.
pub trait PowerState: Send + Sync {
    fn is_power_save(&self) -> bool;

    /// Deep idle: background work should be deferred.
    fn is_idle(&self) -> bool;
}

/// Always awake, never saving power.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAwake;

impl PowerState for AlwaysAwake {
    fn is_power_save(&self) -> bool {
        false
    }

    fn is_idle(&self) -> bool {
        false
    }
}

//! ApiTaskRunner - キューを優先度順に 1 件ずつ実行する
//!
//! # 設計
//! - 同時に走るタスクは常に 1 つ（`drain_lock`）。リソースごとの cursor を守るため
//! - タスク境界ですべてのエラーを `TaskOutcome` に変換する。worker には何も漏らさない
//! - 成功時の後始末（定義の削除 + last-success の前進）は 1 トランザクション
//! - 一時的な失敗は runner 全体の `RetryGate` を閉じ、drain を止める

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::api_state::ApiStateMachine;
use super::timeline::TimeLineProjector;
use crate::domain::{ApiState, TaskDefinition, TaskKind, TaskOutcome};
use crate::error::{ApiError, StoreError, TaskError};
use crate::ports::{Clock, Connectivity};
use crate::queue::{AttemptState, PersistentTaskQueue, RetryGate, RetryPolicy};
use crate::store::{Properties, TaskDefinitionRepository};
use crate::typed::{HandlerRegistry, TaskContext};

/// Why a drain ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DrainStop {
    /// Nothing runnable is left.
    Idle,
    /// API calls are not allowed by the current connectivity.
    Offline,
    /// ApiState halts everything.
    Halted { state: ApiState },
    /// The retry gate is closed.
    Backoff { until: DateTime<Utc> },
    /// A task failed in a way that ends the drain.
    Failed { kind: TaskKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub executed: Vec<(TaskKind, TaskOutcome)>,
    pub stop: DrainStop,
}

impl DrainReport {
    pub fn succeeded(&self) -> usize {
        self.executed.iter().filter(|(_, o)| o.is_success()).count()
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub allow_metered: bool,
    /// Consecutive transient failures before the error flag is set.
    pub error_threshold: u32,
    pub retry: RetryPolicy,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            allow_metered: true,
            error_threshold: 3,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ApiTaskRunner {
    queue: Arc<PersistentTaskQueue>,
    registry: Arc<HandlerRegistry>,
    ctx: TaskContext,
    api_state: Arc<ApiStateMachine>,
    projector: Arc<TimeLineProjector>,
    connectivity: Arc<dyn Connectivity>,
    settings: RunnerSettings,
    gate: Mutex<RetryGate>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl ApiTaskRunner {
    pub fn new(
        queue: Arc<PersistentTaskQueue>,
        registry: Arc<HandlerRegistry>,
        ctx: TaskContext,
        api_state: Arc<ApiStateMachine>,
        projector: Arc<TimeLineProjector>,
        connectivity: Arc<dyn Connectivity>,
        settings: RunnerSettings,
    ) -> Self {
        let gate = Mutex::new(RetryGate::new(settings.retry.clone()));
        Self {
            queue,
            registry,
            ctx,
            api_state,
            projector,
            connectivity,
            settings,
            gate,
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn gate(&self) -> MutexGuard<'_, RetryGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn online(&self) -> bool {
        self.connectivity
            .status()
            .can_call_api(self.settings.allow_metered)
    }

    /// May `task` attempt a network call right now?
    pub fn can_run(&self, task: &TaskDefinition) -> bool {
        self.online() && task.kind.may_run_in(self.api_state.current())
    }

    /// When the retry gate opens again, if it is closed.
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.gate().not_before()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.gate().consecutive_failures()
    }

    /// Forget backoff state. Used by user-initiated retry.
    pub fn reset_backoff(&self) {
        self.gate().reset();
    }

    /// Run tasks in priority order until nothing is runnable or a task ends
    /// the drain. Concurrent callers wait for the running drain.
    pub async fn drain(&self) -> Result<DrainReport, StoreError> {
        let _running = self.drain_lock.lock().await;
        let mut executed = Vec::new();

        let stop = loop {
            let now = self.ctx.clock.now();
            let closed_until = {
                let gate = self.gate();
                gate.not_before().filter(|_| !gate.is_open(now))
            };
            if let Some(until) = closed_until {
                break DrainStop::Backoff { until };
            }

            let online = self.online();
            let state = self.api_state.evaluate()?;
            let Some(task) = self.queue.next_runnable(online, state)? else {
                break if !online {
                    DrainStop::Offline
                } else if state.halts_execution() {
                    DrainStop::Halted { state }
                } else {
                    DrainStop::Idle
                };
            };

            let span = info_span!("api_task", kind = %task.kind, task_id = %task.id);
            let outcome = self.run_task(&task).instrument(span).await;
            debug!(kind = %task.kind, state = ?outcome.attempt_state(), "attempt finished");
            let stops = outcome.stops_drain();
            executed.push((task.kind, outcome));
            if stops {
                break DrainStop::Failed { kind: task.kind };
            }
        };

        info!(executed = executed.len(), ?stop, "drain finished");
        Ok(DrainReport { executed, stop })
    }

    async fn run_task(&self, task: &TaskDefinition) -> TaskOutcome {
        let Some(handler) = self.registry.get(task.kind) else {
            return self.handle_failure(task, TaskError::HandlerNotFound(task.kind));
        };

        info!(state = ?AttemptState::Running, "task started");
        let applied = match handler.run(&self.ctx, task).await {
            Ok(applied) => applied,
            Err(e) => return self.handle_failure(task, e),
        };

        if let Err(e) = self.complete(task) {
            return self.handle_failure(task, TaskError::Store(e));
        }
        info!(
            applied = applied.applied,
            skipped = applied.skipped,
            "task finished"
        );
        TaskOutcome::Succeeded {
            applied: applied.applied,
            skipped: applied.skipped,
        }
    }

    /// Success bookkeeping. The definition only disappears together with the
    /// advanced sync state.
    fn complete(&self, task: &TaskDefinition) -> Result<(), StoreError> {
        let now = self.ctx.clock.now();
        self.ctx.db.transaction(|conn| {
            TaskDefinitionRepository::delete(conn, task.id)?;
            if task.kind.advances_sync_state() {
                Properties::set_last_sync_success(conn, task.kind.resource(), now)?;
            }
            Properties::set_last_api_success(conn, now)?;
            Properties::set_api_in_error(conn, false)?;
            if task.kind == TaskKind::GetUser {
                Properties::set_user_refresh_required(conn, false)?;
            }
            Ok(())
        })?;

        // the task itself is done from here on; later failures are only logged
        self.gate().record_success();
        if let Err(e) = self.api_state.evaluate() {
            error!(error = %e, "api state evaluation failed");
        }
        if task.kind.affects_timeline()
            && let Err(e) = self.projector.recompute(now)
        {
            error!(error = %e, "time line recompute failed");
        }
        Ok(())
    }

    fn handle_failure(&self, task: &TaskDefinition, err: TaskError) -> TaskOutcome {
        let now = self.ctx.clock.now();
        match &err {
            TaskError::Api(api) if api.is_retryable() => {
                let (until, failures) = {
                    let mut gate = self.gate();
                    let until = gate.record_failure(now, api.retry_after());
                    (until, gate.consecutive_failures())
                };
                warn!(error = %err, failures, %until, "task failed, will retry");
                if failures >= self.settings.error_threshold
                    && let Err(e) = self.api_state.mark_in_error()
                {
                    error!(error = %e, "failed to persist api error flag");
                }
            }
            TaskError::Api(ApiError::Unauthorized(_)) => {
                warn!(error = %err, "credentials rejected, halting");
                if let Err(e) = self.api_state.mark_rejected() {
                    error!(error = %e, "failed to persist rejected flag");
                }
            }
            TaskError::Store(_) => {
                error!(error = %err, "storage failure, task stays queued");
            }
            _ => {
                warn!(error = %err, "task failed permanently, dropping");
                if let Err(e) = self.queue.remove(task.id) {
                    error!(error = %e, "failed to drop task");
                }
            }
        }
        TaskOutcome::from(err)
    }
}

//! EngineBuilder - コラボレーターを受け取り、エンジン全体を組み立てる
//!
//! # 学習ポイント
//! - Builder パターン（必須のものは build 時に検証）
//! - 起動時検証（Fail-fast 設計）: handler が揃っていない registry は受け付けない
//! - 共有状態（DB、LiveValue）は 1 回だけ作り、コンストラクタ引数で配る

use std::sync::Arc;

use tracing::{info, warn};

use super::api_state::ApiStateMachine;
use super::notifications::NotificationPlanner;
use super::runner::{ApiTaskRunner, RunnerSettings};
use super::staleness::StalenessPolicy;
use super::sync::{SyncService, SyncSettings};
use super::timeline::TimeLineProjector;
use super::worker::{BackgroundWorker, WorkerSettings};
use crate::config::SyncConfig;
use crate::domain::{ApiState, OnlineStatus, TaskId, TaskKind, TimeLine};
use crate::error::StoreError;
use crate::observable::LiveValue;
use crate::ports::{
    AlwaysAwake, ApiClient, Clock, Connectivity, LogNotifier, ManualConnectivity, Notifier,
    PowerState, SystemClock, UlidGenerator,
};
use crate::queue::PersistentTaskQueue;
use crate::store::{Database, Properties};
use crate::typed::{HandlerRegistry, TaskContext};

/// Fail-fast errors of `EngineBuilder::build`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("no handler registered for task kinds {0:?}")]
    MissingHandlers(Vec<TaskKind>),

    #[error("initial state could not be loaded: {0}")]
    Store(#[from] StoreError),
}

/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .database(Arc::new(Database::open(&path)?))
///     .api_client(Arc::new(client))
///     .build()?;
/// ```
pub struct EngineBuilder {
    config: SyncConfig,
    db: Option<Arc<Database>>,
    api: Option<Arc<dyn ApiClient>>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    power: Arc<dyn PowerState>,
    notifier: Arc<dyn Notifier>,
    registry: HandlerRegistry,
}

impl EngineBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            db: None,
            api: None,
            clock: Arc::new(SystemClock),
            connectivity: Arc::new(ManualConnectivity::new(OnlineStatus::Unmetered)),
            power: Arc::new(AlwaysAwake),
            notifier: Arc::new(LogNotifier),
            registry: HandlerRegistry::standard(),
        }
    }

    pub fn database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn api_client(mut self, api: Arc<dyn ApiClient>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn power(mut self, power: Arc<dyn PowerState>) -> Self {
        self.power = power;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the handler registry (the standard one covers every kind).
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// # 検証
    /// - database / api client が渡されているか
    /// - すべての task kind に handler があるか
    pub fn build(self) -> Result<Engine, BuildError> {
        let db = self.db.ok_or(BuildError::MissingCollaborator("database"))?;
        let api = self.api.ok_or(BuildError::MissingCollaborator("api client"))?;
        let missing = self.registry.missing_kinds();
        if !missing.is_empty() {
            return Err(BuildError::MissingHandlers(missing));
        }

        let config = self.config;
        let clock = self.clock;
        let now = clock.now();

        let queue = Arc::new(PersistentTaskQueue::new(
            Arc::clone(&db),
            Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            Arc::clone(&clock),
        ));
        let api_state = Arc::new(ApiStateMachine::new(Arc::clone(&db), Arc::clone(&clock)));
        let projector = Arc::new(TimeLineProjector::new(
            Arc::clone(&db),
            config.timeline_hours,
            config.vacation_policy,
            now,
        ));
        let staleness = Arc::new(StalenessPolicy::new(
            Arc::clone(&db),
            Arc::clone(&queue),
            Arc::clone(&api_state),
        ));
        let ctx = TaskContext {
            db: Arc::clone(&db),
            api,
            clock: Arc::clone(&clock),
            request_timeout: config.request_timeout(),
        };
        let runner = Arc::new(ApiTaskRunner::new(
            Arc::clone(&queue),
            Arc::new(self.registry),
            ctx,
            Arc::clone(&api_state),
            Arc::clone(&projector),
            Arc::clone(&self.connectivity),
            RunnerSettings {
                allow_metered: config.allow_metered,
                error_threshold: config.error_threshold,
                retry: config.retry.policy(),
            },
        ));
        let sync = Arc::new(SyncService::new(
            Arc::clone(&db),
            Arc::clone(&clock),
            Arc::clone(&queue),
            staleness,
            Arc::clone(&runner),
            Arc::clone(&api_state),
            Arc::clone(&projector),
            Arc::clone(&self.connectivity),
            self.power,
            SyncSettings::from(&config),
        ));

        // a store from a previous run may already carry credentials and data
        if let Some(token) = config.api_token.as_deref()
            && db.with_conn(Properties::api_token)?.as_deref() != Some(token)
        {
            api_state.set_credentials(token)?;
        }
        let state = api_state.evaluate()?;
        projector.recompute(now)?;

        let planner = config.notifications.then(|| {
            let planner = Arc::new(NotificationPlanner::new(Arc::clone(&db), self.notifier));
            let observer = Arc::clone(&planner);
            let observer_clock = Arc::clone(&clock);
            projector.live().observe(move |_| {
                if let Err(e) = observer.notify(observer_clock.now()) {
                    warn!(error = %e, "notification planning failed");
                }
            });
            planner
        });

        info!(%state, db = %config.database_path.display(), "engine ready");
        Ok(Engine {
            db,
            clock,
            connectivity: self.connectivity,
            queue,
            api_state,
            projector,
            runner,
            sync,
            planner,
        })
    }
}

/// Wired engine. Cheap to share behind an `Arc`.
pub struct Engine {
    pub(crate) db: Arc<Database>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) connectivity: Arc<dyn Connectivity>,
    pub(crate) queue: Arc<PersistentTaskQueue>,
    pub(crate) api_state: Arc<ApiStateMachine>,
    pub(crate) projector: Arc<TimeLineProjector>,
    pub(crate) runner: Arc<ApiTaskRunner>,
    pub(crate) sync: Arc<SyncService>,
    pub(crate) planner: Option<Arc<NotificationPlanner>>,
}

impl Engine {
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn queue(&self) -> &Arc<PersistentTaskQueue> {
        &self.queue
    }

    pub fn runner(&self) -> &Arc<ApiTaskRunner> {
        &self.runner
    }

    pub fn sync(&self) -> &Arc<SyncService> {
        &self.sync
    }

    pub fn projector(&self) -> &Arc<TimeLineProjector> {
        &self.projector
    }

    pub fn notifications(&self) -> Option<&Arc<NotificationPlanner>> {
        self.planner.as_ref()
    }

    /// Observable ApiState.
    pub fn api_state(&self) -> Arc<LiveValue<ApiState>> {
        self.api_state.live()
    }

    pub fn api_state_machine(&self) -> &Arc<ApiStateMachine> {
        &self.api_state
    }

    /// Observable TimeLine.
    pub fn time_line(&self) -> Arc<LiveValue<TimeLine>> {
        self.projector.live()
    }

    pub fn login(&self, token: &str) -> Result<ApiState, StoreError> {
        self.runner.reset_backoff();
        self.api_state.set_credentials(token)
    }

    pub fn logout(&self) -> Result<ApiState, StoreError> {
        self.api_state.clear_credentials()
    }

    /// Queue a refresh of specific subjects.
    pub fn refresh_subjects(&self, ids: &[i64]) -> Result<Option<TaskId>, StoreError> {
        let data = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.queue.enqueue(TaskKind::GetSubjectsById, &data)
    }

    pub fn spawn_worker(&self, settings: WorkerSettings) -> BackgroundWorker {
        BackgroundWorker::spawn(
            Arc::clone(&self.sync),
            Arc::clone(&self.connectivity),
            Arc::clone(&self.clock),
            settings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApiClient;
    use crate::typed::ResourceHandler;
    use crate::typed::record::UserData;

    fn db() -> Arc<Database> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn build_requires_database_and_api_client() {
        let result = EngineBuilder::new(SyncConfig::default())
            .api_client(Arc::new(FakeApiClient::new()))
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingCollaborator("database"))
        ));

        let result = EngineBuilder::new(SyncConfig::default())
            .database(db())
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingCollaborator("api client"))
        ));
    }

    #[test]
    fn build_rejects_incomplete_registry() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Arc::new(ResourceHandler::<UserData>::new(TaskKind::GetUser)))
            .unwrap();
        let result = EngineBuilder::new(SyncConfig::default())
            .database(db())
            .api_client(Arc::new(FakeApiClient::new()))
            .registry(registry)
            .build();
        match result {
            Err(BuildError::MissingHandlers(missing)) => {
                assert_eq!(missing.len(), TaskKind::ALL.len() - 1);
                assert!(!missing.contains(&TaskKind::GetUser));
            }
            _ => panic!("expected MissingHandlers"),
        }
    }

    #[test]
    fn token_from_config_configures_credentials() {
        let config = SyncConfig {
            api_token: Some("secret".into()),
            ..SyncConfig::default()
        };
        let engine = EngineBuilder::new(config)
            .database(db())
            .api_client(Arc::new(FakeApiClient::new()))
            .build()
            .unwrap();
        assert_eq!(*engine.api_state().get(), ApiState::NeedsRefresh);
    }

    #[test]
    fn refresh_subjects_queues_a_parameterized_task() {
        let engine = EngineBuilder::new(SyncConfig::default())
            .database(db())
            .api_client(Arc::new(FakeApiClient::new()))
            .build()
            .unwrap();
        engine.refresh_subjects(&[3, 1]).unwrap();
        engine.refresh_subjects(&[7]).unwrap();
        let pending = engine.queue().pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].data, "3,1");
    }
}

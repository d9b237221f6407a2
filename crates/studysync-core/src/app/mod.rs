//! App - アプリケーション層
//!
//! ports と store を組み合わせて同期エンジンを実装する。
//!
//! # 主要コンポーネント
//! - **ApiStateMachine**: API 全体の健全性と、タスク実行の可否
//! - **StalenessPolicy**: 古くなったリソースのタスクを enqueue
//! - **ApiTaskRunner**: キューを優先度順に 1 件ずつ実行
//! - **TimeLineProjector**: TimeLine の再計算と publish
//! - **NotificationPlanner**: TimeLine の変化から通知を決める
//! - **SyncService**: assert + drain の入口（同時実行は 1 つ）
//! - **BackgroundWorker**: トリガー / 接続変化 / tick を受けて SyncService を回す
//! - **EngineBuilder**: 上記のワイヤリング

pub mod api_state;
pub mod builder;
pub mod notifications;
pub mod runner;
pub mod staleness;
pub mod status;
pub mod sync;
pub mod timeline;
pub mod worker;

pub use self::api_state::{ApiFlags, ApiStateMachine};
pub use self::builder::{BuildError, Engine, EngineBuilder};
pub use self::notifications::{NotificationDecision, NotificationPlanner};
pub use self::runner::{ApiTaskRunner, DrainReport, DrainStop, RunnerSettings};
pub use self::staleness::{AssertReport, StalenessPolicy};
pub use self::status::{EngineStatus, TimeLineSummary};
pub use self::sync::{HouseKeeping, SkipReason, SyncOutcome, SyncReport, SyncService, TriggerSource};
pub use self::timeline::TimeLineProjector;
pub use self::worker::{BackgroundWorker, TriggerHandle, WorkerSettings};

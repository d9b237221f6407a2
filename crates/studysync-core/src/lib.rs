//! studysync-core
//!
//! Sync engine for a personal study-progress tracker: a durable task queue,
//! staleness-driven scheduling, a single-worker task runner and a reactive
//! time line of available and upcoming study items.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task kind, resource, state, outcome, time line）
//! - **ports**: 外部コラボレーターの trait（ApiClient, Clock, Connectivity, Notifier など）
//! - **store**: SQLite ストレージ（source of truth）
//! - **queue**: 永続キューと retry policy
//! - **typed**: 型付きリモートレコードと task handler
//! - **observable**: LiveValue（単一の現在値 + listener）
//! - **app**: アプリケーション層（runner, staleness, api state, time line, sync, worker）
//! - **config**: 設定の読み込み
//! - **testing**: テスト用 fake（`testing` feature か cfg(test) のときだけ）

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod observable;
pub mod ports;
pub mod queue;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod typed;

pub use app::{Engine, EngineBuilder};
pub use config::SyncConfig;
pub use error::SyncError;

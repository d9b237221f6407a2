//! Ports - 外部コラボレーターとの境界
//!
//! Hexagonal Architecture の「ポート」。エンジンはここの trait にだけ依存し、
//! 実装（HTTP クライアント、OS の接続状態、通知表示など）は外から注入する。
//!
//! - SQLite が source of truth（正本）。ストレージは `store` が直接持つ
//! - ネットワーク、接続状態、電源状態、時刻、通知はすべて trait で差し替え可能

pub mod api_client;
pub mod clock;
pub mod connectivity;
pub mod id_generator;
pub mod notifier;

pub use self::api_client::{ApiClient, Page, PageRequest};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::connectivity::{AlwaysAwake, Connectivity, ManualConnectivity, PowerState};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::{LogNotifier, Notifier};

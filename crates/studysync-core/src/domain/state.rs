//! State enums shared across the engine.
//!
//! - `ApiState`: API 全体の健全性（ApiStateMachine が唯一の所有者）
//! - `OnlineStatus`: ホストの接続状態（永続化しない）

use std::fmt;

use serde::{Deserialize, Serialize};

/// Overall API health.
///
/// Evaluation order (first match wins):
/// - no credentials -> Unconfigured
/// - server rejected credentials -> CredentialsRejected
/// - repeated transient failures -> TransientError
/// - profile stale or refresh requested -> NeedsRefresh
/// - otherwise -> Ok
///
/// `Unknown` is only the value before the first evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiState {
    #[default]
    Unknown,
    Unconfigured,
    CredentialsRejected,
    TransientError,
    NeedsRefresh,
    Ok,
}

impl ApiState {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiState::Unknown => "UNKNOWN",
            ApiState::Unconfigured => "UNCONFIGURED",
            ApiState::CredentialsRejected => "CREDENTIALS_REJECTED",
            ApiState::TransientError => "TRANSIENT_ERROR",
            ApiState::NeedsRefresh => "NEEDS_REFRESH",
            ApiState::Ok => "OK",
        }
    }

    /// States in which the queue must not be drained at all.
    pub fn halts_execution(self) -> bool {
        matches!(self, ApiState::Unconfigured | ApiState::CredentialsRejected)
    }
}

impl fmt::Display for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host connectivity, as reported by the connectivity collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnlineStatus {
    #[default]
    NoConnection,
    /// Online over a connection the user may not want background traffic on.
    Metered,
    Unmetered,
}

impl OnlineStatus {
    pub fn is_online(self) -> bool {
        self != OnlineStatus::NoConnection
    }

    /// May tasks attempt network calls right now?
    pub fn can_call_api(self, allow_metered: bool) -> bool {
        match self {
            OnlineStatus::NoConnection => false,
            OnlineStatus::Metered => allow_metered,
            OnlineStatus::Unmetered => true,
        }
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OnlineStatus::NoConnection => "no_connection",
            OnlineStatus::Metered => "metered",
            OnlineStatus::Unmetered => "unmetered",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halting_states() {
        assert!(ApiState::Unconfigured.halts_execution());
        assert!(ApiState::CredentialsRejected.halts_execution());
        assert!(!ApiState::TransientError.halts_execution());
        assert!(!ApiState::Ok.halts_execution());
    }

    #[test]
    fn metered_connections_respect_setting() {
        assert!(OnlineStatus::Metered.can_call_api(true));
        assert!(!OnlineStatus::Metered.can_call_api(false));
        assert!(OnlineStatus::Unmetered.can_call_api(false));
        assert!(!OnlineStatus::NoConnection.can_call_api(true));
    }

    #[test]
    fn api_state_serializes_screaming() {
        let json = serde_json::to_string(&ApiState::CredentialsRejected).unwrap();
        assert_eq!(json, "\"CREDENTIALS_REJECTED\"");
    }
}

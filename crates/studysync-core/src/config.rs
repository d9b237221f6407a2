//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SyncConfig::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::queue::RetryPolicy;

pub const ENV_DB: &str = "STUDYSYNC_DB";
pub const ENV_API_URL: &str = "STUDYSYNC_API_URL";
pub const ENV_API_TOKEN: &str = "STUDYSYNC_API_TOKEN";

/// What vacation mode hides from the time line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VacationPolicy {
    /// Empty time line: no lessons, reviews, buckets or long-term date.
    #[default]
    SuppressAll,
    /// Only the available-now lists are emptied.
    KeepUpcoming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_secs: u64,
    pub multiplier: f64,
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            multiplier: 2.0,
            max_delay_secs: 900,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.base_delay_secs),
            multiplier: self.multiplier,
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub api_base_url: String,
    /// Only ever read from the environment; never written to the settings file.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub timeline_hours: usize,
    pub background_sync: bool,
    pub allow_metered: bool,
    pub offline_settle_millis: u64,
    pub background_min_interval_secs: u64,
    pub error_threshold: u32,
    pub retry: RetrySettings,
    pub vacation_policy: VacationPolicy,
    pub notifications: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: data_dir().join("studysync.db"),
            api_base_url: "https://api.wanikani.com/v2".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            timeline_hours: 24,
            background_sync: true,
            allow_metered: true,
            offline_settle_millis: 2000,
            background_min_interval_secs: 300,
            error_threshold: 3,
            retry: RetrySettings::default(),
            vacation_policy: VacationPolicy::default(),
            notifications: true,
        }
    }
}

impl SyncConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn offline_settle(&self) -> Duration {
        Duration::from_millis(self.offline_settle_millis)
    }

    pub fn background_min_interval(&self) -> Duration {
        Duration::from_secs(self.background_min_interval_secs)
    }
}

/// `~/.studysync`
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".studysync")
}

/// Resolve the path to the settings file (`~/.studysync/settings.json`).
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_config() -> Result<SyncConfig, ConfigError> {
    load_config_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_config_from_path(path: &Path) -> Result<SyncConfig, ConfigError> {
    let mut config = load_file(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

fn load_file(path: &Path) -> Result<SyncConfig, ConfigError> {
    let defaults = serde_json::to_value(SyncConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides. `lookup` is `std::env::var` outside tests.
///
/// Empty values are ignored.
pub fn apply_env_overrides(config: &mut SyncConfig, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = read(ENV_DB) {
        config.database_path = PathBuf::from(v);
    }
    if let Some(v) = read(ENV_API_URL) {
        if v.starts_with("http://") || v.starts_with("https://") {
            config.api_base_url = v.trim_end_matches('/').to_string();
        } else {
            warn!(key = ENV_API_URL, value = %v, "invalid url env var, ignoring");
        }
    }
    if let Some(v) = read(ENV_API_TOKEN) {
        config.api_token = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_file(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.timeline_hours, 24);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn file_values_are_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"timeline_hours": 12, "retry": {{"max_delay_secs": 60}}, "vacation_policy": "keep_upcoming", "notifications": null}}"#
        )
        .unwrap();

        let config = load_file(&path).unwrap();
        assert_eq!(config.timeline_hours, 12);
        assert_eq!(config.retry.max_delay_secs, 60);
        assert_eq!(config.retry.base_delay_secs, 5);
        assert_eq!(config.vacation_policy, VacationPolicy::KeepUpcoming);
        assert!(config.notifications);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_file(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = SyncConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                (ENV_DB, "/var/lib/studysync.db"),
                (ENV_API_URL, "http://localhost:8080/v2/"),
                (ENV_API_TOKEN, "token-123"),
            ]),
        );
        assert_eq!(config.database_path, PathBuf::from("/var/lib/studysync.db"));
        assert_eq!(config.api_base_url, "http://localhost:8080/v2");
        assert_eq!(config.api_token.as_deref(), Some("token-123"));
    }

    #[test]
    fn bad_or_empty_env_values_are_ignored() {
        let mut config = SyncConfig::default();
        apply_env_overrides(&mut config, env(&[(ENV_API_URL, "ftp://x"), (ENV_DB, " ")]));
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn deep_merge_replaces_arrays_and_skips_nulls() {
        let merged = deep_merge(
            json!({"a": {"b": 1, "c": [1, 2]}, "d": 1}),
            json!({"a": {"c": [3]}, "d": null}),
        );
        assert_eq!(merged, json!({"a": {"b": 1, "c": [3]}, "d": 1}));
    }

    #[test]
    fn token_is_never_serialized() {
        let config = SyncConfig {
            api_token: Some("secret".into()),
            ..SyncConfig::default()
        };
        let v = serde_json::to_value(&config).unwrap();
        assert!(v.get("api_token").is_none());
    }
}

//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls retry
//! defaults, backoff and local task concurrency.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
///
/// Loaded from `~/.keelson/config.toml`. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retries applied to tasks that do not set `max_retries`.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Upper bound on tasks dispatched to the local runtime at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<usize>,

    /// How long `shutdown` waits for interrupted runs to record RESUMABLE.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// A RUNNING workflow whose owner has not heartbeated for this long is
    /// considered orphaned. Zero treats every foreign owner as dead.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_lease_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            retry: RetrySettings::default(),
            max_concurrent_tasks: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            lease_secs: default_lease_secs(),
        }
    }
}

/// Delay policy between task retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// `base_delay * 2^(retry - 1)`, capped at `max_delay`.
    #[default]
    Exponential,
    /// `base_delay` before every retry.
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            backoff: BackoffKind::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.retry.backoff, BackoffKind::Exponential);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert!(config.max_concurrent_tasks.is_none());
        assert_eq!(config.lease_secs, 30);
    }

    #[test]
    fn test_engine_config_partial_toml() {
        let config: EngineConfig = toml::from_str(
            r#"
default_max_retries = 5

[retry]
backoff = "fixed"
"#,
        )
        .unwrap();
        assert_eq!(config.default_max_retries, 5);
        assert_eq!(config.retry.backoff, BackoffKind::Fixed);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.shutdown_grace_secs, 5);
    }

    #[test]
    fn test_engine_config_empty_toml_is_default() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;
use vaultsync_core::EngineConfig;

use crate::maintenance::RetentionPolicy;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    /// Shared secret clients present as a bearer token; open access when unset
    pub auth_token: Option<String>,
    pub history_debounce: Duration,
    pub history_keep_versions: usize,
    pub session_queue_capacity: usize,
    /// How long tombstones are kept before being purged; `None` keeps them forever
    pub tombstone_retention: Option<Duration>,
    pub cleanup_interval: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("history_debounce", &self.history_debounce)
            .field("history_keep_versions", &self.history_keep_versions)
            .field("session_queue_capacity", &self.session_queue_capacity)
            .field("tombstone_retention", &self.tombstone_retention)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "VAULTSYNC_BIND_ADDR", "127.0.0.1:9000");
        let database_path = value_or_default(&lookup, "VAULTSYNC_DATABASE_PATH", "vaultsync.db");
        let auth_token = optional_trimmed(&lookup, "VAULTSYNC_AUTH_TOKEN");
        let require_auth = optional_trimmed(&lookup, "VAULTSYNC_REQUIRE_AUTH")
            .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"));
        if require_auth && auth_token.is_none() {
            return Err(ConfigError::MissingVar("VAULTSYNC_AUTH_TOKEN"));
        }

        let history_debounce_secs =
            bounded(&lookup, "VAULTSYNC_HISTORY_DEBOUNCE_SECS", "20", 1..=600)?;
        let history_keep_versions =
            bounded(&lookup, "VAULTSYNC_HISTORY_KEEP_VERSIONS", "100", 1..=10_000)?;
        let session_queue_capacity =
            bounded(&lookup, "VAULTSYNC_SESSION_QUEUE", "256", 8..=65_536)?;
        let retention_days =
            bounded(&lookup, "VAULTSYNC_TOMBSTONE_RETENTION_DAYS", "30", 0..=3_650)?;
        let cleanup_interval_secs =
            bounded(&lookup, "VAULTSYNC_CLEANUP_INTERVAL_SECS", "3600", 60..=86_400)?;

        Ok(Self {
            bind_addr,
            database_path,
            auth_token,
            history_debounce: Duration::from_secs(history_debounce_secs),
            history_keep_versions: as_usize(history_keep_versions),
            session_queue_capacity: as_usize(session_queue_capacity),
            tombstone_retention: (retention_days > 0)
                .then_some(Duration::from_secs(retention_days * SECS_PER_DAY)),
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
        })
    }

    /// Engine tunables derived from the environment; everything else keeps its default.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_history_debounce(self.history_debounce)
            .with_history_keep_versions(self.history_keep_versions)
            .with_session_queue_capacity(self.session_queue_capacity)
    }

    pub const fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_versions: self.history_keep_versions,
            tombstone_retention: self.tombstone_retention,
        }
    }
}

fn bounded(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = value_or_default(lookup, name, default)
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn as_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

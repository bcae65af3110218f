//! Runtime configuration for the core.
//!
//! # Invariants
//! - Every field has a default; unset environment variables keep it.
//! - Malformed values are rejected, never silently replaced by defaults.

use crate::cache::DEFAULT_CACHE_TTL;
use crate::db::DEFAULT_BUSY_TIMEOUT;
use crate::logging::{default_log_level, normalize_level};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const ENV_LOCK_TIMEOUT_MS: &str = "SPECBOARD_LOCK_TIMEOUT_MS";
const ENV_BUSY_TIMEOUT_MS: &str = "SPECBOARD_BUSY_TIMEOUT_MS";
const ENV_CACHE_TTL_SECS: &str = "SPECBOARD_CACHE_TTL_SECS";
const ENV_LOG_LEVEL: &str = "SPECBOARD_LOG_LEVEL";

/// Tunables shared by coordinators of one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Longest wait for a specification or project lock.
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    /// SQLite busy handler timeout for file databases.
    #[serde(with = "millis")]
    pub busy_timeout: Duration,
    /// Lifetime of cached item listings.
    #[serde(with = "secs")]
    pub cache_ttl: Duration,
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            log_level: default_log_level().to_string(),
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by `SPECBOARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_LOCK_TIMEOUT_MS) {
            config.lock_timeout = Duration::from_millis(parse_u64(ENV_LOCK_TIMEOUT_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout = Duration::from_millis(parse_u64(ENV_BUSY_TIMEOUT_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_CACHE_TTL_SECS) {
            config.cache_ttl = Duration::from_secs(parse_u64(ENV_CACHE_TTL_SECS, &value)?);
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            config.log_level = normalize_level(&value)
                .map_err(|reason| ConfigError::Invalid {
                    key: ENV_LOG_LEVEL,
                    value: value.clone(),
                    reason,
                })?
                .to_string();
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { key, value, reason } => {
                write!(f, "invalid {key}=`{value}`: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|err| ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: err.to_string(),
        })
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

//! Pool configuration.
//!
//! A config can be built in code, deserialized (e.g. from a JSON file), and
//! overlaid with `RATEPOOL_*` environment variables.

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};
use crate::rate::{DEFAULT_QPS, Rate};

/// Environment variable overriding [`PoolConfig::capacity`].
pub const CAPACITY_ENV: &str = "RATEPOOL_CAPACITY";
/// Environment variable overriding [`PoolConfig::qps`].
pub const QPS_ENV: &str = "RATEPOOL_QPS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of admission tokens outstanding at once.
    pub capacity: usize,
    /// Target admissions per second.
    #[serde(default = "default_qps")]
    pub qps: u64,
}

fn default_qps() -> u64 {
    DEFAULT_QPS
}

impl PoolConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            qps: DEFAULT_QPS,
        }
    }

    pub fn with_qps(mut self, qps: u64) -> Self {
        self.qps = qps;
        self
    }

    /// Build a config purely from the environment.
    ///
    /// `RATEPOOL_CAPACITY` is required; `RATEPOOL_QPS` is optional.
    pub fn from_env() -> Result<Self> {
        Self::new(0).apply_env()
    }

    /// Overlay `RATEPOOL_*` environment variables onto this config.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay overrides produced by `lookup`, then validate.
    pub fn apply_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(CAPACITY_ENV) {
            self.capacity = parse_setting(CAPACITY_ENV, &raw)?;
        }
        if let Some(raw) = lookup(QPS_ENV) {
            self.qps = parse_setting(QPS_ENV, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidCapacity {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// The effective rate, after falling back for unusable values.
    pub fn rate(&self) -> Rate {
        Rate::per_second_or_default(self.qps)
    }
}

fn parse_setting<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PoolError::InvalidSetting {
            key,
            value: raw.to_string(),
        })
}

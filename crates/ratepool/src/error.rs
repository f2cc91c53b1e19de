//! Errors surfaced by the pool.

use std::time::Duration;

/// Errors returned from pool construction and job execution.
///
/// Failures signalled by the job itself are never wrapped here; they are
/// part of the job's own return value and reach the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Capacity must be at least one token.
    #[error("invalid capacity {capacity}: capacity must be greater than zero")]
    InvalidCapacity { capacity: usize },

    /// A configuration override could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidSetting { key: &'static str, value: String },

    /// The pool has been closed; no further jobs are admitted.
    #[error("pool has been closed")]
    Shutdown,

    /// No admission token became available before the deadline.
    #[error("timed out after {waited:?} waiting for an admission token")]
    Timeout { waited: Duration },

    /// A blocking call was made from inside an async runtime.
    #[error("blocking pool call made from within an async runtime; use the async variant")]
    BlockingInRuntime,

    /// The background producer could not be started.
    #[error("failed to start token producer: {0}")]
    Runtime(#[source] std::io::Error),
}

impl PoolError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    pub fn is_blocking_in_runtime(&self) -> bool {
        matches!(self, Self::BlockingInRuntime)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for errors that can only occur while building a pool.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidCapacity { .. } | Self::InvalidSetting { .. } | Self::Runtime(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

//! ratepool: run a job under a concurrency cap and a token-bucket admission rate.

pub mod config;
pub mod error;
mod occupancy;
pub mod pool;
mod producer;
pub mod rate;
mod stats;
mod store;

pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use occupancy::PoolState;
pub use pool::Pool;
pub use rate::{DEFAULT_QPS, Rate};
pub use stats::PoolStats;

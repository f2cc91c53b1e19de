//! Rate-gated job pool.
//!
//! A [`Pool`] owns a token store, the occupancy ledger and a background
//! producer that mints tokens at the configured rate. Callers spend one token
//! per job; the job then runs on the caller's own thread (or task), holding
//! one unit of capacity until it returns.
//!
//! The pool supplies no worker threads for jobs. Its only thread is the
//! single-worker runtime that drives the producer and the timers used by
//! the blocking deadline path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::occupancy::{Occupancy, PoolState};
use crate::producer;
use crate::rate::{DEFAULT_QPS, Rate, RateCell};
use crate::stats::PoolStats;
use crate::store::{Token, TokenStore, token_store};

const PRODUCER_THREAD: &str = "ratepool-producer";

/// State shared between the pool handle and the producer.
pub(crate) struct Shared {
    pub(crate) occupancy: Occupancy,
    pub(crate) store: TokenStore,
    pub(crate) rate: RateCell,
    /// Wakes the producer out of its tick wait on close.
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    pub(crate) fn new(capacity: usize, rate: Rate) -> Arc<Self> {
        let (minter, store) = token_store(capacity);
        Arc::new(Self {
            occupancy: Occupancy::new(capacity, minter),
            store,
            rate: RateCell::new(rate),
            shutdown: CancellationToken::new(),
        })
    }
}

type Job<A, R> = dyn Fn(A) -> R + Send + Sync + 'static;

/// Runs a fixed job under a concurrency cap and an admission rate.
///
/// `capacity` bounds both the tokens buffered in the store and the number of
/// jobs running at once. Tokens are minted one per tick; each call consumes
/// one. Whatever the job returns is handed back unchanged.
pub struct Pool<A, R> {
    shared: Arc<Shared>,
    job: Box<Job<A, R>>,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl<A, R> Pool<A, R> {
    /// Create a pool admitting [`DEFAULT_QPS`] jobs per second.
    pub fn new<F>(capacity: usize, job: F) -> Result<Self>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self::with_rate(capacity, DEFAULT_QPS, job)
    }

    pub fn with_rate<F>(capacity: usize, qps: u64, job: F) -> Result<Self>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self::from_config(&PoolConfig::new(capacity).with_qps(qps), job)
    }

    /// Validate `config`, start the producer and return the running pool.
    ///
    /// Nothing is started if the config is invalid.
    pub fn from_config<F>(config: &PoolConfig, job: F) -> Result<Self>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        config.validate()?;
        let rate = config.rate();

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(PRODUCER_THREAD)
            .enable_time()
            .build()
            .map_err(PoolError::Runtime)?;

        let shared = Shared::new(config.capacity, rate);
        runtime.spawn(producer::run(Arc::clone(&shared)));

        tracing::info!(
            capacity = config.capacity,
            qps = rate.qps(),
            interval_us = rate.interval_us(),
            "Pool started"
        );

        Ok(Self {
            shared,
            job: Box::new(job),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Run the job once a token is available, blocking the calling thread.
    ///
    /// Fails with [`PoolError::Shutdown`] without waiting if the pool is
    /// closed, and while waiting if the pool is closed underneath it.
    ///
    /// Returns [`PoolError::BlockingInRuntime`] without waiting if called
    /// from within an async runtime; use [`Pool::execute_async`] there.
    pub fn execute(&self, arg: A) -> Result<R> {
        self.ensure_running()?;
        ensure_blocking_allowed()?;
        let token = self.block_on(self.take())?;
        self.run(token, arg)
    }

    /// Like [`Pool::execute`], but gives up with [`PoolError::Timeout`] if no
    /// token arrives within `timeout`. A timed-out call consumes no token.
    ///
    /// Returns [`PoolError::BlockingInRuntime`] without waiting if called
    /// from within an async runtime; use
    /// [`Pool::execute_with_deadline_async`] there.
    pub fn execute_with_deadline(&self, arg: A, timeout: Duration) -> Result<R> {
        self.ensure_running()?;
        ensure_blocking_allowed()?;
        let token = self.block_on(self.take_within(timeout))?;
        self.run(token, arg)
    }

    /// Async form of [`Pool::execute`]. The job runs inline on the calling task.
    pub async fn execute_async(&self, arg: A) -> Result<R> {
        self.ensure_running()?;
        let token = self.take().await?;
        self.run(token, arg)
    }

    /// Async form of [`Pool::execute_with_deadline`].
    ///
    /// The deadline is timed on the caller's runtime.
    pub async fn execute_with_deadline_async(&self, arg: A, timeout: Duration) -> Result<R> {
        self.ensure_running()?;
        let token = self.take_within(timeout).await?;
        self.run(token, arg)
    }

    /// Run the job only if a token is resident right now.
    ///
    /// Returns `Ok(None)`, dropping `arg`, when no token is immediately
    /// available.
    pub fn try_execute(&self, arg: A) -> Result<Option<R>> {
        self.ensure_running()?;
        match self.shared.store.try_take() {
            Some(token) => self.run(token, arg).map(Some),
            None if self.is_closed() => Err(PoolError::Shutdown),
            None => Ok(None),
        }
    }

    /// Change the admission rate. Takes effect after the producer's next tick.
    ///
    /// A rate that yields a non-positive interval falls back to the default.
    pub fn set_rate(&self, qps: u64) {
        let rate = Rate::per_second_or_default(qps);
        let previous = self.shared.rate.set(rate);
        if previous != rate {
            tracing::debug!(
                from = previous.qps(),
                to = rate.qps(),
                "Admission rate reconfigured"
            );
        }
    }

    /// Stop minting, close the token store and fail all waiting callers.
    ///
    /// Jobs already running are not interrupted. Calling `close` again is a
    /// no-op.
    pub fn close(&self) {
        if !self.shared.occupancy.stop() {
            tracing::debug!("Pool already closed");
            return;
        }
        self.shared.shutdown.cancel();

        let stats = self.stats();
        tracing::info!(
            minted = stats.minted,
            admitted = stats.admitted,
            in_flight = stats.in_flight,
            "Pool closed"
        );
    }

    pub fn capacity(&self) -> usize {
        self.shared.occupancy.capacity()
    }

    pub fn rate(&self) -> Rate {
        self.shared.rate.get()
    }

    pub fn interval(&self) -> Duration {
        self.rate().interval()
    }

    /// Tokens currently waiting in the store.
    ///
    /// Includes a token a caller has just received but not yet accounted
    /// for, so this can briefly read one higher per such caller.
    pub fn occupancy(&self) -> usize {
        self.shared.occupancy.resident()
    }

    /// Jobs currently running.
    pub fn in_flight(&self) -> usize {
        self.shared.occupancy.in_flight()
    }

    pub fn state(&self) -> PoolState {
        self.shared.occupancy.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PoolState::Stopped
    }

    pub fn stats(&self) -> PoolStats {
        let ledger = self.shared.occupancy.snapshot();
        let rate = self.rate();
        PoolStats {
            capacity: self.capacity(),
            qps: rate.qps(),
            interval_us: rate.interval_us(),
            resident: ledger.resident,
            in_flight: ledger.in_flight,
            minted: ledger.minted,
            admitted: ledger.admitted,
            state: ledger.state,
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PoolError::Shutdown);
        }
        Ok(())
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }

    async fn take(&self) -> Result<Token> {
        self.shared.store.take().await.ok_or(PoolError::Shutdown)
    }

    async fn take_within(&self, timeout: Duration) -> Result<Token> {
        // `take` is cancel safe, so losing the race to the timer leaves any
        // token in the store for the next caller.
        match tokio::time::timeout(timeout, self.shared.store.take()).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(PoolError::Shutdown),
            Err(_) => Err(PoolError::Timeout { waited: timeout }),
        }
    }

    fn run(&self, token: Token, arg: A) -> Result<R> {
        let Some(_admission) = self.shared.occupancy.admit(token) else {
            return Err(PoolError::Shutdown);
        };
        Ok((self.job)(arg))
    }
}

// `Handle::block_on` panics on a runtime thread; report it as an error instead.
fn ensure_blocking_allowed() -> Result<()> {
    if Handle::try_current().is_ok() {
        return Err(PoolError::BlockingInRuntime);
    }
    Ok(())
}

impl<A, R> fmt::Debug for Pool<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("rate", &self.rate())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<A, R> Drop for Pool<A, R> {
    fn drop(&mut self) {
        self.close();
        if let Some(runtime) = self.runtime.take() {
            // Safe to call from inside another runtime, unlike dropping it.
            runtime.shutdown_background();
        }
    }
}

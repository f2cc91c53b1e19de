//! Occupancy ledger: the single synchronization point for pool accounting.
//!
//! Every count the pool keeps, and the pool's running state, lives behind one
//! mutex. The sending half of the token store lives there too: the pool is
//! `Running` exactly while the ledger still owns it, so "check state, check
//! capacity, enqueue, count" is one critical section and a concurrent close
//! can never observe a half-minted token or race a write into a closed store.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::store::Token;

/// Lifecycle state of a pool. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Running,
    Stopped,
}

/// Outcome of a single mint attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mint {
    Minted,
    /// Capacity is spent; try again next tick.
    Full,
    /// The pool is stopped; the producer should exit.
    Stopped,
}

struct Ledger {
    minter: Option<mpsc::Sender<Token>>,
    /// Tokens sitting in the store.
    resident: usize,
    /// Jobs admitted and still running.
    in_flight: usize,
    minted: u64,
    admitted: u64,
}

/// Point-in-time copy of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LedgerSnapshot {
    pub resident: usize,
    pub in_flight: usize,
    pub minted: u64,
    pub admitted: u64,
    pub state: PoolState,
}

pub(crate) struct Occupancy {
    capacity: usize,
    ledger: Mutex<Ledger>,
}

impl Occupancy {
    pub(crate) fn new(capacity: usize, minter: mpsc::Sender<Token>) -> Self {
        Self {
            capacity,
            ledger: Mutex::new(Ledger {
                minter: Some(minter),
                resident: 0,
                in_flight: 0,
                minted: 0,
                admitted: 0,
            }),
        }
    }

    // No user code runs under this lock, so a poisoned guard still holds a
    // consistent ledger.
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mint one token if the pool is running and capacity is not spent.
    pub(crate) fn try_mint(&self) -> Mint {
        let mut ledger = self.ledger();
        let Some(minter) = ledger.minter.as_ref() else {
            return Mint::Stopped;
        };
        if ledger.resident + ledger.in_flight >= self.capacity {
            return Mint::Full;
        }

        match minter.try_send(Token::mint()) {
            Ok(()) => {
                ledger.resident += 1;
                ledger.minted += 1;
                Mint::Minted
            }
            Err(TrySendError::Full(_)) => {
                tracing::error!(
                    resident = ledger.resident,
                    in_flight = ledger.in_flight,
                    "Token store full below capacity"
                );
                debug_assert!(false, "token store full below capacity");
                Mint::Full
            }
            Err(TrySendError::Closed(_)) => Mint::Stopped,
        }
    }

    /// Account for a token taken from the store.
    ///
    /// Returns `None` if the pool stopped while the token was buffered; the
    /// token is discarded and no job may run on it.
    pub(crate) fn admit(&self, token: Token) -> Option<Admission<'_>> {
        let mut ledger = self.ledger();
        debug_assert!(ledger.resident > 0, "token taken with no resident tokens");
        ledger.resident = ledger.resident.saturating_sub(1);
        drop(token);

        if ledger.minter.is_none() {
            tracing::debug!(resident = ledger.resident, "Discarding token buffered at shutdown");
            return None;
        }
        ledger.in_flight += 1;
        ledger.admitted += 1;
        Some(Admission { occupancy: self })
    }

    fn finish(&self) {
        let mut ledger = self.ledger();
        debug_assert!(ledger.in_flight > 0, "admission finished twice");
        ledger.in_flight = ledger.in_flight.saturating_sub(1);
    }

    /// Transition to `Stopped` and close the store.
    ///
    /// Returns `false` if the pool was already stopped.
    pub(crate) fn stop(&self) -> bool {
        // Dropping the sender closes the store; waiters drain what is
        // buffered and then observe the close.
        self.ledger().minter.take().is_some()
    }

    pub(crate) fn state(&self) -> PoolState {
        if self.ledger().minter.is_some() {
            PoolState::Running
        } else {
            PoolState::Stopped
        }
    }

    pub(crate) fn resident(&self) -> usize {
        self.ledger().resident
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.ledger().in_flight
    }

    pub(crate) fn snapshot(&self) -> LedgerSnapshot {
        let ledger = self.ledger();
        LedgerSnapshot {
            resident: ledger.resident,
            in_flight: ledger.in_flight,
            minted: ledger.minted,
            admitted: ledger.admitted,
            state: if ledger.minter.is_some() {
                PoolState::Running
            } else {
                PoolState::Stopped
            },
        }
    }
}

/// Capacity held by a running job. Released on drop, including on unwind.
#[must_use = "dropping an Admission releases its capacity immediately"]
pub(crate) struct Admission<'a> {
    occupancy: &'a Occupancy,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.occupancy.finish();
    }
}

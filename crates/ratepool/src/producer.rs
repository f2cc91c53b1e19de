//! Token-bucket producer loop.
//!
//! Ticks at the configured admission interval and mints at most one token per
//! tick. A rate change is picked up after the tick that observes it and
//! re-arms the timer with the new period.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::occupancy::Mint;
use crate::pool::Shared;

fn ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    // Late ticks are dropped rather than replayed as a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

pub(crate) async fn run(shared: Arc<Shared>) {
    let mut rate = shared.rate.get();
    let mut ticks = ticker(rate.interval());

    loop {
        tokio::select! {
            biased;

            _ = shared.shutdown.cancelled() => break,
            _ = ticks.tick() => {}
        }

        match shared.occupancy.try_mint() {
            Mint::Minted => tracing::trace!("Minted admission token"),
            Mint::Full => {}
            Mint::Stopped => break,
        }

        let current = shared.rate.get();
        if current != rate {
            tracing::debug!(
                qps = current.qps(),
                interval_us = current.interval_us(),
                "Producer adopting new admission rate"
            );
            rate = current;
            ticks = ticker(rate.interval());
        }
    }

    tracing::debug!("Token producer exiting");
}

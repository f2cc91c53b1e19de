//! Admission rate and the producer tick interval derived from it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Admissions per second used when no rate is configured, or when a
/// configured rate cannot be expressed as a tick interval.
pub const DEFAULT_QPS: u64 = 800;

const MICROS_PER_SEC: u64 = 1_000_000;

/// A validated admission rate in tokens per second.
///
/// The producer ticks every `1_000_000 / qps` microseconds, so a valid rate
/// is one whose truncated interval is at least one microsecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate(u64);

impl Rate {
    pub const DEFAULT: Rate = Rate(DEFAULT_QPS);

    /// Returns `None` when `qps` would yield a non-positive tick interval.
    pub fn per_second(qps: u64) -> Option<Rate> {
        if qps == 0 || MICROS_PER_SEC / qps == 0 {
            return None;
        }
        Some(Rate(qps))
    }

    /// Like [`Rate::per_second`], falling back to [`Rate::DEFAULT`].
    pub fn per_second_or_default(qps: u64) -> Rate {
        match Self::per_second(qps) {
            Some(rate) => rate,
            None => {
                tracing::warn!(
                    qps,
                    fallback = DEFAULT_QPS,
                    "Admission rate yields a non-positive interval, using default"
                );
                Rate::DEFAULT
            }
        }
    }

    pub fn qps(self) -> u64 {
        self.0
    }

    /// Time between producer ticks.
    pub fn interval(self) -> Duration {
        Duration::from_micros(self.interval_us())
    }

    pub fn interval_us(self) -> u64 {
        MICROS_PER_SEC / self.0
    }
}

impl Default for Rate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Rate shared between the pool handle and the producer loop.
///
/// Writers replace the whole value; the producer reads it once per tick.
#[derive(Debug)]
pub(crate) struct RateCell(AtomicU64);

impl RateCell {
    pub(crate) fn new(rate: Rate) -> Self {
        Self(AtomicU64::new(rate.qps()))
    }

    pub(crate) fn get(&self) -> Rate {
        Rate(self.0.load(Ordering::Acquire))
    }

    /// Store `rate`, returning the one it replaced.
    pub(crate) fn set(&self, rate: Rate) -> Rate {
        Rate(self.0.swap(rate.qps(), Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_ticks_every_1250us() {
        assert_eq!(Rate::default().qps(), 800);
        assert_eq!(Rate::default().interval_us(), 1250);
        assert_eq!(Rate::default().interval(), Duration::from_micros(1250));
    }

    #[test]
    fn interval_truncates_to_whole_microseconds() {
        assert_eq!(
            Rate::per_second(1000).unwrap().interval(),
            Duration::from_millis(1)
        );
        assert_eq!(
            Rate::per_second(3).unwrap().interval(),
            Duration::from_micros(333_333)
        );
        assert_eq!(
            Rate::per_second(1_000_000).unwrap().interval(),
            Duration::from_micros(1)
        );
    }

    #[test]
    fn non_positive_intervals_are_rejected() {
        assert_eq!(Rate::per_second(0), None);
        assert_eq!(Rate::per_second(1_000_001), None);
        assert_eq!(Rate::per_second_or_default(0), Rate::DEFAULT);
        assert_eq!(Rate::per_second_or_default(u64::MAX), Rate::DEFAULT);
    }

    #[test]
    fn cell_swaps_rates() {
        let cell = RateCell::new(Rate::DEFAULT);
        let previous = cell.set(Rate::per_second(50).unwrap());
        assert_eq!(previous, Rate::DEFAULT);
        assert_eq!(cell.get().qps(), 50);
        assert_eq!(cell.get().interval(), Duration::from_millis(20));
    }
}

//! Concurrent arrival statistics.
//!
//! Tracks how many records have arrived and the running mean inter-arrival
//! interval in microseconds, updated lock-free from any number of delivery
//! threads. The mean is stored as `f64` bits in an `AtomicU64` and updated
//! through a compare-exchange loop, so concurrent arrivals never tear it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use thiserror::Error;
use tracing::info;

/// Mean updates are logged every this many arrivals (0-indexed).
const LOG_EVERY_ARRIVALS: u64 = 1000;

/// The running-mean update could not absorb a new sample: the accumulated
/// total is so large that adding the interval leaves it bit-identical.
///
/// This is fatal to the statistics instance: the mean is frozen and every
/// later [`ArrivalStats::record_arrival`] reports the same error. The
/// arrival count keeps incrementing so monitoring stays truthful.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("running mean update lost precision at {arrivals} arrivals")]
pub struct PrecisionOverflow {
    /// Pre-increment arrival index at which precision ran out.
    pub arrivals: u64,
}

/// One consistent-enough view of the tracker for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalSnapshot {
    /// Total arrivals recorded so far.
    pub arrivals: u64,
    /// Running mean inter-arrival interval in microseconds.
    pub mean_us: f64,
    /// Whether the mean has been frozen by a precision failure.
    pub poisoned: bool,
}

/// Lock-free tracker for arrival count and mean inter-arrival interval.
///
/// Construction takes the monotonic "session open" reading that seeds the
/// interval chain, so the first recorded interval measures open-to-first-
/// record and carries that small systematic bias.
pub struct ArrivalStats {
    /// Base monotonic instant; timestamps are nanoseconds since this.
    opened_at: Instant,
    /// Total arrivals recorded.
    arrivals: AtomicU64,
    /// Running mean inter-arrival interval, microseconds, stored as f64 bits.
    mean_us: AtomicU64,
    /// Previous arrival timestamp, nanoseconds since `opened_at`.
    last_arrival_ns: AtomicU64,
    /// Latched once a mean update fails the precision guard.
    poisoned: AtomicBool,
}

impl ArrivalStats {
    /// Creates a tracker seeded at the current instant.
    pub fn new() -> Self {
        Self {
            opened_at: Instant::now(),
            arrivals: AtomicU64::new(0),
            mean_us: AtomicU64::new(0.0f64.to_bits()),
            last_arrival_ns: AtomicU64::new(0),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Records one arrival at the current instant.
    ///
    /// Callable concurrently without external synchronization. The
    /// timestamp read-and-swap is a single atomic RMW; racing callers can
    /// observe instants out of order, in which case the interval saturates
    /// at zero rather than going negative.
    ///
    /// # Errors
    ///
    /// Returns [`PrecisionOverflow`] when the interval is too small relative
    /// to the accumulated total to change it in `f64` arithmetic, and on
    /// every call after that. The count still increments.
    pub fn record_arrival(&self) -> Result<(), PrecisionOverflow> {
        let now_ns = self.opened_at.elapsed().as_nanos() as u64;
        self.apply_arrival(now_ns)
    }

    /// Folds an arrival at `now_ns` (nanoseconds since `opened_at`) into the
    /// count and running mean.
    fn apply_arrival(&self, now_ns: u64) -> Result<(), PrecisionOverflow> {
        let prev_ns = self.last_arrival_ns.swap(now_ns, Ordering::AcqRel);
        let delta_us = now_ns.saturating_sub(prev_ns) as f64 / 1000.0;
        let n = self.arrivals.fetch_add(1, Ordering::AcqRel);

        if self.poisoned.load(Ordering::Acquire) {
            return Err(PrecisionOverflow { arrivals: n });
        }

        let mut current = self.mean_us.load(Ordering::Acquire);
        loop {
            let mean = f64::from_bits(current);
            let total = n as f64 * mean;
            // A zero-length interval (same-instant concurrent arrivals) is a
            // legitimate sample; only a vanishing positive one is precision loss.
            if delta_us > 0.0 && total + delta_us == total {
                self.poisoned.store(true, Ordering::Release);
                return Err(PrecisionOverflow { arrivals: n });
            }
            let next = (total + delta_us) / (n as f64 + 1.0);
            match self.mean_us.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if n.is_multiple_of(LOG_EVERY_ARRIVALS) {
                        info!(
                            "Arrival stats: {} arrivals, mean interval {:.3} ms",
                            n,
                            next / 1000.0
                        );
                    }
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Total arrivals recorded so far.
    pub fn arrival_count(&self) -> u64 {
        self.arrivals.load(Ordering::Relaxed)
    }

    /// Running mean inter-arrival interval in microseconds.
    ///
    /// Returns `0.0` before the first arrival completes an interval.
    pub fn mean_interval_us(&self) -> f64 {
        f64::from_bits(self.mean_us.load(Ordering::Acquire))
    }

    /// Whether the mean has been frozen by a precision failure.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Snapshot of count, mean, and poison state for reporting.
    pub fn snapshot(&self) -> ArrivalSnapshot {
        ArrivalSnapshot {
            arrivals: self.arrival_count(),
            mean_us: self.mean_interval_us(),
            poisoned: self.is_poisoned(),
        }
    }

    /// Puts the tracker into its failure mode without 2^60 arrivals.
    #[cfg(test)]
    pub(crate) fn poison_for_tests(&self) {
        self.poisoned.store(true, Ordering::Release);
    }
}

impl Default for ArrivalStats {
    fn default() -> Self {
        Self::new()
    }
}

//! Hybrid logical timestamps and the oracle that issues them.
//!
//! A [`Timestamp`] packs wall-clock milliseconds into the high bits and a
//! logical counter into the low [`LOGICAL_BITS`] bits, so timestamps order
//! like a logical clock but can still be compared against a staleness window
//! expressed in milliseconds.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Number of low bits reserved for the logical counter.
pub const LOGICAL_BITS: u32 = 18;

const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// A hybrid logical timestamp.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The zero timestamp; nothing is written at or before it.
    pub const ZERO: Self = Self(0);

    /// Largest representable timestamp.
    pub const MAX: Self = Self(u64::MAX);

    /// Wraps a raw timestamp value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Composes a timestamp from a physical millisecond clock and a logical counter.
    #[must_use]
    pub const fn compose(physical_ms: u64, logical: u64) -> Self {
        Self((physical_ms << LOGICAL_BITS) | (logical & LOGICAL_MASK))
    }

    /// Physical (wall clock) component in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn physical_ms(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// Logical component.
    #[must_use]
    pub const fn logical(self) -> u64 {
        self.0 & LOGICAL_MASK
    }

    /// Returns the timestamp `ms` milliseconds earlier, with the logical part cleared.
    #[must_use]
    pub const fn saturating_sub_ms(self, ms: u64) -> Self {
        Self::compose(self.physical_ms().saturating_sub(ms), 0)
    }

    /// Physical component as a UTC date-time, for logs and diagnostics.
    #[must_use]
    pub fn physical_time(self) -> Option<DateTime<Utc>> {
        let ms = i64::try_from(self.physical_ms()).ok()?;
        Utc.timestamp_millis_opt(ms).single()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Source of strictly increasing timestamps.
///
/// Production deployments delegate to the coordination service; an
/// unreachable oracle must surface `CoreError::Unavailable` rather than
/// returning a reused or approximated value.
#[async_trait]
pub trait TimestampOracle: Send + Sync {
    /// Allocates a timestamp strictly greater than every previously returned one.
    async fn allocate(&self) -> CoreResult<Timestamp>;
}

/// In-process hybrid clock oracle.
///
/// Uses the wall clock when it moves forward and bumps the logical counter
/// otherwise, so allocations stay strictly increasing even if the clock stalls
/// or steps backwards.
#[derive(Debug, Default)]
pub struct HybridTimestampOracle {
    last: AtomicU64,
}

impl HybridTimestampOracle {
    /// Creates an oracle with no prior allocations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Creates an oracle whose next allocation is greater than `floor`.
    ///
    /// Used when recovering from persisted state.
    #[must_use]
    pub fn starting_after(floor: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(floor.as_u64()),
        }
    }

    /// Returns the last allocated timestamp without allocating.
    #[must_use]
    pub fn last_allocated(&self) -> Timestamp {
        Timestamp(self.last.load(Ordering::Acquire))
    }

    /// Synchronous allocation, shared by the async trait implementation.
    pub fn allocate_now(&self) -> Timestamp {
        let physical = Timestamp::compose(wall_clock_ms(), 0).as_u64();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = if physical > prev { physical } else { prev + 1 };
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Timestamp(next),
                Err(observed) => prev = observed,
            }
        }
    }
}

#[async_trait]
impl TimestampOracle for HybridTimestampOracle {
    async fn allocate(&self) -> CoreResult<Timestamp> {
        Ok(self.allocate_now())
    }
}

fn wall_clock_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_compose_and_split() {
        let ts = Timestamp::compose(1_700_000_000_000, 5);
        assert_eq!(ts.physical_ms(), 1_700_000_000_000);
        assert_eq!(ts.logical(), 5);
        assert_eq!(ts.saturating_sub_ms(1_000).physical_ms(), 1_699_999_999_000);
        assert_eq!(ts.saturating_sub_ms(1_000).logical(), 0);
        assert!(ts.physical_time().is_some());
    }

    #[test]
    fn test_allocations_strictly_increase() {
        let oracle = HybridTimestampOracle::new();
        let mut prev = Timestamp::ZERO;
        for _ in 0..10_000 {
            let ts = oracle.allocate_now();
            assert!(ts > prev, "{ts} should be > {prev}");
            prev = ts;
        }
        assert_eq!(oracle.last_allocated(), prev);
    }

    #[test]
    fn test_starting_after_future_floor() {
        let floor = Timestamp::compose(wall_clock_ms() + 60_000, 0);
        let oracle = HybridTimestampOracle::starting_after(floor);
        assert!(oracle.allocate_now() > floor);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_are_unique() {
        let oracle = Arc::new(HybridTimestampOracle::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let oracle = oracle.clone();
            handles.push(tokio::spawn(async move {
                let mut out = Vec::with_capacity(1_000);
                for _ in 0..1_000 {
                    out.push(oracle.allocate().await.unwrap());
                }
                out
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.await.unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {ts}");
            }
        }
        assert_eq!(seen.len(), 8_000);
    }
}

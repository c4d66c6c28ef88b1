//! Sliding-window expiry bookkeeping shared by the stores.
//!
//! Timestamps are nanoseconds since a per-store monotonic epoch, held in
//! atomics so that readers of the same session never need a write lock just
//! to record an access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic clock anchored at store construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    epoch: Instant,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the epoch.
    pub(crate) fn now(&self) -> u64 {
        duration_to_nanos(self.epoch.elapsed())
    }
}

/// Store-wide maximum idle time. Zero means entries never expire.
#[derive(Debug)]
pub(crate) struct MaxAge(AtomicU64);

impl MaxAge {
    pub(crate) fn new(max_age: Duration) -> Self {
        Self(AtomicU64::new(duration_to_nanos(max_age)))
    }

    pub(crate) fn get(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, max_age: Duration) {
        self.0.store(duration_to_nanos(max_age), Ordering::Release);
    }
}

/// Last-access stamp of one entry.
#[derive(Debug)]
pub(crate) struct AccessStamp(AtomicU64);

impl AccessStamp {
    pub(crate) fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    /// Record an access. The stamp never moves backwards, even when two
    /// threads race with slightly out-of-order clock readings.
    pub(crate) fn touch(&self, now: u64) {
        self.0.fetch_max(now, Ordering::AcqRel);
    }

    pub(crate) fn last(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// `now - last > max_age`, with a zero `max_age` never expiring.
    pub(crate) fn is_expired(&self, now: u64, max_age: Duration) -> bool {
        if max_age.is_zero() {
            return false;
        }
        now.saturating_sub(self.last()) > duration_to_nanos(max_age)
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

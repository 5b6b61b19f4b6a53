//! Time sources used to stamp trace events

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Clock shared by every tapper created from one configuration
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time; never goes backwards for one source
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock anchored once and advanced by a monotonic [`Instant`]
///
/// System clock adjustments after construction do not affect the stamps,
/// so events of a trace are always in non-decreasing order.
#[derive(Debug)]
pub struct SystemTimeSource {
    anchor_wall: DateTime<Utc>,
    anchor_mono: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor_mono: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.anchor_mono.elapsed()).unwrap_or(Duration::zero());
        self.anchor_wall + elapsed
    }
}

/// Manually driven clock for tests and deterministic replays
#[derive(Debug)]
pub struct ManualTimeSource {
    now_us: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_us: AtomicI64::new(start.timestamp_micros()),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: std::time::Duration) {
        let micros = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        self.now_us.fetch_add(micros, Ordering::Relaxed);
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.now_us.load(Ordering::Relaxed))
            .unwrap_or(DateTime::<Utc>::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_is_monotonic() {
        let clock = SystemTimeSource::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_manual_advance() {
        let clock = ManualTimeSource::default();
        let start = clock.now();
        clock.advance(std::time::Duration::from_millis(5));
        assert_eq!(clock.now() - start, Duration::milliseconds(5));
    }
}

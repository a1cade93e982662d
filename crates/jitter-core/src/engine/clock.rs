//! Wall clock sources and the RTP media timeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vjitter_rtp_core::time::{duration_to_ticks, ticks_to_millis};

/// Source of wall clock time for the engine
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The system monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Maps wall clock time onto the stream's extended timestamp domain.
///
/// The anchor only moves when a packet carries a timestamp ahead of the
/// current estimate, so the estimated media time never goes backwards.
#[derive(Debug, Clone)]
pub struct MediaClock {
    clock_rate: u32,
    anchor: Option<(i64, Instant)>,
}

impl MediaClock {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate,
            anchor: None,
        }
    }

    /// Estimated media time at `now`, in timestamp ticks
    pub fn estimate(&self, now: Instant) -> Option<i64> {
        self.anchor.map(|(ts, at)| {
            ts + duration_to_ticks(now.saturating_duration_since(at), self.clock_rate)
        })
    }

    /// Account for a packet carrying `timestamp` seen at `now` and return the
    /// estimated media time in milliseconds
    pub fn observe(&mut self, timestamp: i64, now: Instant) -> i64 {
        match self.estimate(now) {
            Some(estimate) if estimate >= timestamp => ticks_to_millis(estimate, self.clock_rate),
            _ => {
                self.anchor = Some((timestamp, now));
                ticks_to_millis(timestamp, self.clock_rate)
            }
        }
    }

    /// Milliseconds of an extended timestamp
    pub fn to_millis(&self, timestamp: i64) -> i64 {
        ticks_to_millis(timestamp, self.clock_rate)
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Switch clock rate; the mapping is re-anchored by the next packet
    pub fn set_clock_rate(&mut self, clock_rate: u32) {
        if clock_rate != self.clock_rate {
            self.clock_rate = clock_rate;
            self.anchor = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();

        other.advance_ms(25);
        assert_eq!(clock.now() - start, Duration::from_millis(25));
    }

    #[test]
    fn test_media_clock_never_regresses() {
        let clock = ManualClock::new();
        let mut media = MediaClock::new(90_000);

        assert_eq!(media.observe(90_000, clock.now()), 1000);

        clock.advance_ms(40);
        // An old timestamp does not pull the mapping back
        assert_eq!(media.observe(0, clock.now()), 1040);

        // A timestamp ahead of the estimate re-anchors
        assert_eq!(media.observe(90_000 + 9000, clock.now()), 1100);
        clock.advance_ms(10);
        assert_eq!(media.estimate(clock.now()), Some(90_000 + 9000 + 900));
    }

    #[test]
    fn test_clock_rate_change_resets_anchor() {
        let clock = ManualClock::new();
        let mut media = MediaClock::new(90_000);
        media.observe(9000, clock.now());

        media.set_clock_rate(48_000);
        assert_eq!(media.estimate(clock.now()), None);
        assert_eq!(media.observe(48_000, clock.now()), 1000);
    }
}

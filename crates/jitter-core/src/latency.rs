//! Inter-arrival latency estimation
//!
//! Packets of one frame share a timestamp and are sent back to back, so the
//! spread of their arrival times is a usable proxy for network jitter. The
//! estimator keeps a smoothed gap per recently seen timestamp and averages
//! them on demand.

use std::collections::BTreeMap;

use tracing::trace;

/// Default number of timestamps tracked
pub const DEFAULT_LATENCY_WINDOW: usize = 400;

#[derive(Debug, Clone)]
struct TrackedTimestamp {
    last_arrival_ms: i64,
    packet_count: u32,
    latency_ms: Option<i64>,
}

/// Smoothed per-timestamp inter-arrival latency
#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    /// Extended timestamp -> tracked arrivals
    tracked: BTreeMap<i64, TrackedTimestamp>,
    capacity: usize,
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl LatencyEstimator {
    /// Create an estimator tracking at most `capacity` timestamps
    pub fn new(capacity: usize) -> Self {
        Self {
            tracked: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record the arrival of a packet carrying `timestamp` at `arrival_ms`.
    ///
    /// The first arrival for a timestamp leaves its latency unknown, the second
    /// sets it to the gap, and later ones fold half of each new gap in.
    pub fn insert(&mut self, timestamp: i64, arrival_ms: i64) {
        match self.tracked.get_mut(&timestamp) {
            Some(entry) => {
                let gap = arrival_ms - entry.last_arrival_ms;
                entry.latency_ms = Some(match entry.latency_ms {
                    None => gap,
                    Some(old) => old + gap / 2,
                });
                entry.packet_count += 1;
                entry.last_arrival_ms = arrival_ms;
            }
            None => {
                self.tracked.insert(timestamp, TrackedTimestamp {
                    last_arrival_ms: arrival_ms,
                    packet_count: 1,
                    latency_ms: None,
                });
            }
        }

        while self.tracked.len() > self.capacity {
            if let Some((oldest, _)) = self.tracked.pop_first() {
                trace!("Latency estimator evicted timestamp {}", oldest);
            }
        }
    }

    /// Mean of the known, non-negative latencies, or `None` if there are none
    pub fn estimate(&self) -> Option<i64> {
        let (sum, count) = self
            .tracked
            .values()
            .filter_map(|t| t.latency_ms)
            .filter(|l| *l >= 0)
            .fold((0i64, 0i64), |(sum, count), l| (sum + l, count + 1));

        if count == 0 {
            None
        } else {
            Some(sum / count)
        }
    }

    /// Number of timestamps currently tracked
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Whether no timestamp is tracked
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Packets seen for `timestamp`
    pub fn packet_count(&self, timestamp: i64) -> u32 {
        self.tracked.get(&timestamp).map_or(0, |t| t.packet_count)
    }
}

//! Retransmission request bookkeeping

use std::collections::VecDeque;

/// Number of round trips averaged for the resend backoff
pub const RTT_SAMPLES: usize = 10;

/// A sequence that has been requested at least once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRetransmission {
    /// Media time of the first request
    pub first_send_ms: i64,
    /// Media time of the most recent request
    pub last_send_ms: i64,
    /// Number of requests sent
    pub send_count: u32,
}

impl PendingRetransmission {
    pub fn new(now_ms: i64) -> Self {
        Self {
            first_send_ms: now_ms,
            last_send_ms: now_ms,
            send_count: 1,
        }
    }

    /// Record another request
    pub fn resend(&mut self, now_ms: i64) {
        self.last_send_ms = now_ms;
        self.send_count += 1;
    }

    /// Whether the request is due again under `backoff_ms`
    pub fn is_due(&self, now_ms: i64, backoff_ms: i64) -> bool {
        now_ms - self.last_send_ms > backoff_ms
    }

    /// Whether the retransmission budget is spent
    pub fn is_expired(&self, now_ms: i64, budget_ms: i64) -> bool {
        now_ms - self.first_send_ms > budget_ms
    }
}

/// Round trips of recovered packets, shared across frames
#[derive(Debug, Clone, Default)]
pub struct RetransmissionRtt {
    samples: VecDeque<i64>,
}

impl RetransmissionRtt {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(RTT_SAMPLES + 1),
        }
    }

    /// Add an observed request-to-arrival round trip
    pub fn record(&mut self, rtt_ms: i64) {
        if rtt_ms <= 0 {
            return;
        }
        self.samples.push_back(rtt_ms);
        if self.samples.len() > RTT_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Mean round trip, if any was observed
    pub fn mean_ms(&self) -> Option<i64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<i64>() / self.samples.len() as i64)
    }

    /// Resend interval: `max(min_ms, 1.2 × mean)`
    pub fn backoff_ms(&self, min_ms: i64) -> i64 {
        match self.mean_ms() {
            Some(mean) => min_ms.max(mean * 6 / 5),
            None => min_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

//! Wraparound-safe RTP sequence and timestamp arithmetic
//!
//! Sequence numbers are 16-bit and wrap; every ordering decision on them must go
//! through [`distance`] / [`before`] rather than raw integer comparison.

use crate::{RtpSequenceNumber, RtpTimestamp};

/// Half of the 16-bit sequence number space
const HALF_SEQ_SPACE: i32 = 1 << 15;

/// Full 16-bit sequence number space
const SEQ_SPACE: i32 = 1 << 16;

/// Signed minimal distance `a - b` over the wrapping 16-bit domain.
///
/// The result lies in `-32768..=32768`; a raw gap of exactly half the domain
/// keeps its raw sign.
pub fn distance(a: RtpSequenceNumber, b: RtpSequenceNumber) -> i32 {
    let raw = a as i32 - b as i32;
    if raw > HALF_SEQ_SPACE {
        raw - SEQ_SPACE
    } else if raw < -HALF_SEQ_SPACE {
        raw + SEQ_SPACE
    } else {
        raw
    }
}

/// Returns true if `a` precedes `b` under wraparound.
pub fn before(a: RtpSequenceNumber, b: RtpSequenceNumber) -> bool {
    distance(a, b) < 0
}

/// Number of sequence numbers in the inclusive span `first..=last`.
///
/// Returns `None` when `last` precedes `first`.
pub fn span_len(first: RtpSequenceNumber, last: RtpSequenceNumber) -> Option<usize> {
    let d = distance(last, first);
    if d < 0 {
        None
    } else {
        Some(d as usize + 1)
    }
}

/// The later of two sequence numbers.
pub fn latest(a: RtpSequenceNumber, b: RtpSequenceNumber) -> RtpSequenceNumber {
    if before(a, b) { b } else { a }
}

/// Sorts sequence numbers in wraparound order and returns the result.
///
/// The order starts right after the widest circular gap between neighbouring
/// values, so it is total even when the set spans more than half the domain.
/// For sets spanning less than half it agrees with [`before`].
pub fn sorted(mut seqs: Vec<RtpSequenceNumber>) -> Vec<RtpSequenceNumber> {
    seqs.sort_unstable();
    let Some(&last) = seqs.last() else {
        return seqs;
    };

    let mut start = 0;
    let mut widest = seqs[0].wrapping_sub(last);
    for i in 1..seqs.len() {
        let gap = seqs[i] - seqs[i - 1];
        if gap > widest {
            widest = gap;
            start = i;
        }
    }
    seqs.rotate_left(start);
    seqs
}

/// Extends 32-bit RTP timestamps into a monotone `i64` domain.
///
/// Each new timestamp is placed relative to the most recent one by the signed
/// 32-bit difference, so the stream may wrap any number of times as long as
/// consecutive timestamps are within 2^31 ticks of each other.
#[derive(Debug, Clone, Default)]
pub struct TimestampUnwrapper {
    last: Option<(RtpTimestamp, i64)>,
}

impl TimestampUnwrapper {
    /// Create an unwrapper with no reference timestamp
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Unwrap a timestamp. The first timestamp seen maps to itself.
    pub fn unwrap(&mut self, timestamp: RtpTimestamp) -> i64 {
        match self.last {
            None => {
                let extended = timestamp as i64;
                self.last = Some((timestamp, extended));
                extended
            }
            Some((last_ts, last_ext)) => {
                let delta = timestamp.wrapping_sub(last_ts) as i32 as i64;
                let extended = last_ext + delta;
                if delta > 0 {
                    self.last = Some((timestamp, extended));
                }
                extended
            }
        }
    }
}

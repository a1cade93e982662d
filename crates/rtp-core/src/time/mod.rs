//! Time and clock utilities for RTP
//!
//! Conversions between RTP media-clock ticks and milliseconds, in both the raw
//! 32-bit domain and the unwrapped `i64` domain used by the jitter buffer.

use std::time::Duration;

/// Convert a duration to media-clock ticks at a given clock rate
pub fn duration_to_ticks(duration: Duration, clock_rate: u32) -> i64 {
    (duration.as_micros() as i128 * clock_rate as i128 / 1_000_000) as i64
}

/// Convert unwrapped media-clock ticks to milliseconds (floor)
pub fn ticks_to_millis(ticks: i64, clock_rate: u32) -> i64 {
    if clock_rate == 0 {
        return 0;
    }
    (ticks as i128 * 1000).div_euclid(clock_rate as i128) as i64
}

/// Ticks per frame for a clock rate and nominal frame rate (at least 1)
pub fn ticks_per_frame(clock_rate: u32, frame_rate: u32) -> i64 {
    if frame_rate == 0 {
        return clock_rate.max(1) as i64;
    }
    ((clock_rate / frame_rate) as i64).max(1)
}

/// Typical clock rates
pub mod clock_rates {
    /// Video clock rate used by every RTP video payload format (90kHz)
    pub const VIDEO_90KHZ: u32 = 90000;
}

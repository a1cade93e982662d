//! Jitter buffer configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use vjitter_rtp_core::time::clock_rates;

use crate::codec::{BoundaryStrategy, VideoCodec};
use crate::error::{Error, Result};

/// Configuration for the receive-side jitter buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterBufferConfig {
    /// Target playout latency in milliseconds
    pub target_latency_ms: u32,
    /// Media clock rate in Hz
    pub clock_rate: u32,
    /// Nominal frame rate used to derive frame ids from timestamps
    pub frame_rate: u32,
    /// Negotiated video codec
    pub codec: VideoCodec,
    /// Overrides the codec's default boundary strategy
    pub boundary_strategy: Option<BoundaryStrategy>,
    /// Playback loop interval in milliseconds
    pub playback_tick_ms: u32,
    /// Number of timestamps tracked by the latency estimator
    pub latency_window: usize,
    /// Whether generic NACK feedback is sent
    pub nack_enabled: bool,
    /// Preceding frames guessed as wholly lost when a frame has no predecessor
    pub max_guessed_lost_frames: u32,
    /// Sequences scanned past the observed maximum while bounds are unresolved
    pub best_effort_overshoot: u16,
    /// Lower bound of the NACK resend interval in milliseconds
    pub min_nack_backoff_ms: u32,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            target_latency_ms: 400,
            clock_rate: clock_rates::VIDEO_90KHZ,
            frame_rate: 25,
            codec: VideoCodec::H264,
            boundary_strategy: None,
            playback_tick_ms: 10,
            latency_window: 400,
            nack_enabled: true,
            max_guessed_lost_frames: 3,
            best_effort_overshoot: 3,
            min_nack_backoff_ms: 100,
        }
    }
}

impl JitterBufferConfig {
    /// Load a configuration from a TOML string; missing keys take defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.clock_rate == 0 {
            return Err(Error::invalid_parameter("clock_rate must be greater than 0"));
        }
        if self.frame_rate == 0 || self.frame_rate > self.clock_rate {
            return Err(Error::invalid_parameter(format!(
                "frame_rate must be in 1..={}, got {}",
                self.clock_rate, self.frame_rate
            )));
        }
        if self.playback_tick_ms == 0 {
            return Err(Error::invalid_parameter("playback_tick_ms must be greater than 0"));
        }
        if self.latency_window == 0 {
            return Err(Error::invalid_parameter("latency_window must be greater than 0"));
        }
        Ok(())
    }

    /// Effective boundary strategy
    pub fn strategy(&self) -> BoundaryStrategy {
        self.boundary_strategy
            .unwrap_or_else(|| self.codec.boundary_strategy())
    }

    /// Playback tick as a duration
    pub fn playback_tick(&self) -> Duration {
        Duration::from_millis(self.playback_tick_ms as u64)
    }

    /// Set the target latency
    pub fn with_target_latency_ms(mut self, latency_ms: u32) -> Self {
        self.target_latency_ms = latency_ms;
        self
    }

    /// Set codec and clock rate
    pub fn with_format(mut self, codec: VideoCodec, clock_rate: u32) -> Self {
        self.codec = codec;
        self.clock_rate = clock_rate;
        self
    }

    /// Set the nominal frame rate
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Force a boundary strategy regardless of codec
    pub fn with_boundary_strategy(mut self, strategy: BoundaryStrategy) -> Self {
        self.boundary_strategy = Some(strategy);
        self
    }

    /// Enable or disable NACK feedback
    pub fn with_nack(mut self, enabled: bool) -> Self {
        self.nack_enabled = enabled;
        self
    }
}

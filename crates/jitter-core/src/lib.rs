//! Receive-side video jitter buffer
//!
//! This crate reassembles coded video frames from an unordered, lossy RTP
//! packet stream, requests retransmission of lost packets with RTCP generic
//! NACK feedback and releases frames to a consumer at a steady pace, a fixed
//! latency behind the live stream.
//!
//! The library is organized into several modules:
//!
//! - `engine`: the jitter buffer itself and its playback loop
//! - `frame`: per-frame packet assembly and loss detection
//! - `latency`: inter-arrival latency estimation
//! - `sink`: traits for the frame consumer and the feedback transport
//! - `codec`: codec identities and frame boundary strategies
//! - `config`: buffer configuration
//! - `logging`: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vjitter_core::prelude::*;
//!
//! # async fn run() -> vjitter_core::Result<()> {
//! let (sink, _frames) = ChannelFrameSink::new(1024);
//! let (feedback, _nacks) = ChannelFeedbackTransport::new(0x1234_5678, 64);
//!
//! let engine = JitterBufferEngine::new(
//!     JitterBufferConfig::default().with_target_latency_ms(200),
//!     Arc::new(sink),
//!     Arc::new(feedback),
//! )?;
//! let playback = engine.start_playback();
//!
//! // engine.receive_packet(packet) for every RTP packet received
//!
//! playback.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod latency;
pub mod logging;
pub mod sink;

pub use codec::{BoundaryStrategy, VideoCodec};
pub use config::JitterBufferConfig;
pub use engine::{JitterBufferEngine, JitterBufferStats, PlaybackHandle};
pub use error::{Error, Result};
pub use sink::{FeedbackTransport, ForwardedPacket, FrameSink, MediaType};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::codec::{BoundaryStrategy, VideoCodec};
    pub use crate::config::JitterBufferConfig;
    pub use crate::engine::{Clock, JitterBufferEngine, JitterBufferStats, ManualClock, PlaybackHandle, SystemClock};
    pub use crate::error::{Error, Result};
    pub use crate::sink::{
        ChannelFeedbackTransport, ChannelFrameSink, FeedbackMessage, FeedbackTransport,
        ForwardedPacket, FrameSink, MediaType,
    };

    pub use vjitter_rtp_core::{RtcpGenericNack, RtpPacket};
}

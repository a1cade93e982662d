//! RTP core library for the vjitter project
//!
//! This crate provides RTP packet encoding/decoding, wraparound-safe sequence
//! arithmetic and the RTCP generic NACK feedback packet used by the receive-side
//! jitter buffer.
//!
//! The library is organized into several modules:
//!
//! - `packet`: RTP packet definitions and the RTCP transport feedback packets
//! - `seq`: 16-bit sequence number ordering and 32-bit timestamp unwrapping
//! - `time`: conversions between RTP timestamps and milliseconds

mod error;

pub mod packet;
pub mod seq;
pub mod time;

pub use error::Error;

pub use packet::{RtpHeader, RtpPacket};
pub use packet::rtcp::{NackPair, RtcpGenericNack, RtcpPacketType};

/// The default maximum size for RTP packets in bytes
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1500;

/// Typedef for RTP timestamp values
pub type RtpTimestamp = u32;

/// Typedef for RTP sequence numbers
pub type RtpSequenceNumber = u16;

/// Typedef for RTP synchronization source identifier
pub type RtpSsrc = u32;

/// Typedef for RTP contributing source identifier
pub type RtpCsrc = u32;

/// Result type for RTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::{
        RtpPacket, RtpHeader, RtpTimestamp, RtpSequenceNumber, RtpSsrc, RtpCsrc,
        Error, Result,
    };

    pub use crate::packet::rtcp::{NackPair, RtcpGenericNack};
    pub use crate::seq::{self, TimestampUnwrapper};
}

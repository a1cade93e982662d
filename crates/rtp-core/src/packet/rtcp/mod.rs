//! RTCP Packet module
//!
//! Only the transport-layer feedback packets needed by a receiving endpoint are
//! modelled here; the generic NACK (RFC 4585 Section 6.2.1) lives in [`nack`].

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::Result;

/// RTCP version (same as RTP, always 2)
pub const RTCP_VERSION: u8 = 2;

/// Size of the common RTCP header in bytes
pub const RTCP_HEADER_SIZE: usize = 4;

/// RTCP packet types used by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketType {
    /// Receiver Report (RR)
    ReceiverReport = 201,

    /// Transport layer feedback (RTPFB) as defined in RFC 4585
    TransportFeedback = 205,

    /// Payload-specific feedback (PSFB) as defined in RFC 4585
    PayloadFeedback = 206,
}

impl TryFrom<u8> for RtcpPacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            201 => Ok(RtcpPacketType::ReceiverReport),
            205 => Ok(RtcpPacketType::TransportFeedback),
            206 => Ok(RtcpPacketType::PayloadFeedback),
            _ => Err(Error::RtcpError(format!("Unknown RTCP packet type: {}", value))),
        }
    }
}

mod nack;

pub use nack::{nack_pairs, NackPair, RtcpGenericNack, NACK_FMT};

/// Common RTCP header: V=2, P, count/FMT (5 bits), packet type, length in
/// 32-bit words minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    /// Padding flag
    pub padding: bool,

    /// Report count, or feedback message type (FMT) for RTPFB/PSFB
    pub count_or_format: u8,

    /// Packet type
    pub packet_type: RtcpPacketType,

    /// Length in 32-bit words minus one
    pub length: u16,
}

impl RtcpHeader {
    /// Serialize the header
    pub fn serialize(&self, buf: &mut BytesMut) {
        let mut first_byte = RTCP_VERSION << 6;
        if self.padding {
            first_byte |= 1 << 5;
        }
        first_byte |= self.count_or_format & 0x1F;
        buf.put_u8(first_byte);
        buf.put_u8(self.packet_type as u8);
        buf.put_u16(self.length);
    }

    /// Parse the header from the front of a buffer
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTCP_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTCP_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let first_byte = buf.get_u8();
        let version = (first_byte >> 6) & 0x03;
        if version != RTCP_VERSION {
            return Err(Error::RtcpError(format!("Invalid RTCP version: {}", version)));
        }

        let padding = (first_byte >> 5) & 0x01 == 1;
        let count_or_format = first_byte & 0x1F;
        let packet_type = RtcpPacketType::try_from(buf.get_u8())?;
        let length = buf.get_u16();

        Ok(Self {
            padding,
            count_or_format,
            packet_type,
            length,
        })
    }

    /// Total packet size in bytes described by the length field
    pub fn packet_size(&self) -> usize {
        (self.length as usize + 1) * 4
    }
}

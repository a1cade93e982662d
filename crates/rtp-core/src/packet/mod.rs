//! RTP packet module
//!
//! RTP header and packet parsing/serialization according to RFC 3550, plus the
//! RTCP feedback packets in [`rtcp`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bitvec::prelude::*;
use std::fmt;

use crate::error::Error;
use crate::{Result, RtpCsrc, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

pub mod rtcp;

/// RTP protocol version (always 2 in practice)
pub const RTP_VERSION: u8 = 2;

/// Padding flag position in the first byte (MSB first)
pub const RTP_PADDING_FLAG: usize = 2;

/// Extension flag position in the first byte (MSB first)
pub const RTP_EXTENSION_FLAG: usize = 3;

/// CSRC count position in the first byte (4 bits, MSB first)
pub const RTP_CC_OFFSET: usize = 4;

/// Marker bit position in the second byte (MSB first)
pub const RTP_MARKER_FLAG: usize = 0;

/// Payload type position in the second byte (7 bits, MSB first)
pub const RTP_PT_OFFSET: usize = 1;

/// Minimum header size (without CSRC or extensions)
pub const RTP_MIN_HEADER_SIZE: usize = 12;

/// RTP header implementation according to RFC 3550
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version (should be 2)
    pub version: u8,

    /// Padding flag
    pub padding: bool,

    /// Extension flag
    pub extension: bool,

    /// CSRC count (number of contributing sources)
    pub cc: u8,

    /// Marker bit
    pub marker: bool,

    /// Payload type
    pub payload_type: u8,

    /// Sequence number
    pub sequence_number: RtpSequenceNumber,

    /// Timestamp
    pub timestamp: RtpTimestamp,

    /// Synchronization source identifier
    pub ssrc: RtpSsrc,

    /// Contributing source identifiers
    pub csrc: Vec<RtpCsrc>,

    /// Extension header profile
    pub extension_id: Option<u16>,

    /// Extension data
    pub extension_data: Option<Bytes>,
}

impl Default for RtpHeader {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl RtpHeader {
    /// Create a new RTP header with default values
    pub fn new(payload_type: u8, sequence_number: RtpSequenceNumber,
               timestamp: RtpTimestamp, ssrc: RtpSsrc) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            cc: 0,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension_id: None,
            extension_data: None,
        }
    }

    /// Get the size of the header in bytes
    pub fn size(&self) -> usize {
        let mut size = RTP_MIN_HEADER_SIZE + self.csrc.len() * 4;

        if self.extension {
            let ext_len = self.extension_data.as_ref().map(|d| d.len()).unwrap_or(0);
            // Extension data is padded to a 32-bit boundary
            size += 4 + (ext_len + 3) / 4 * 4;
        }

        size
    }

    /// Parse an RTP header from bytes
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_MIN_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_MIN_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        // First byte: version (2 bits), padding (1 bit), extension (1 bit), CSRC count (4 bits)
        let first_byte = buf.get_u8();
        let bits = first_byte.view_bits::<Msb0>();

        let version = bits[0..2].load_be::<u8>();
        if version != RTP_VERSION {
            return Err(Error::InvalidPacket(format!("Invalid RTP version: {}", version)));
        }

        let padding = bits[RTP_PADDING_FLAG];
        let extension = bits[RTP_EXTENSION_FLAG];
        let cc = bits[RTP_CC_OFFSET..RTP_CC_OFFSET + 4].load_be::<u8>();

        // Second byte: marker (1 bit), payload type (7 bits)
        let second_byte = buf.get_u8();
        let bits = second_byte.view_bits::<Msb0>();

        let marker = bits[RTP_MARKER_FLAG];
        let payload_type = bits[RTP_PT_OFFSET..RTP_PT_OFFSET + 7].load_be::<u8>();

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let csrc_len = cc as usize * 4;
        if buf.remaining() < csrc_len {
            return Err(Error::BufferTooSmall {
                required: csrc_len,
                available: buf.remaining(),
            });
        }
        let csrc = (0..cc).map(|_| buf.get_u32()).collect();

        let (extension_id, extension_data) = if extension {
            if buf.remaining() < 4 {
                return Err(Error::BufferTooSmall {
                    required: 4,
                    available: buf.remaining(),
                });
            }

            let ext_id = buf.get_u16();
            let ext_length = buf.get_u16() as usize * 4; // Length in 32-bit words

            if buf.remaining() < ext_length {
                return Err(Error::BufferTooSmall {
                    required: ext_length,
                    available: buf.remaining(),
                });
            }

            (Some(ext_id), Some(buf.copy_to_bytes(ext_length)))
        } else {
            (None, None)
        };

        Ok(Self {
            version,
            padding,
            extension,
            cc,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_id,
            extension_data,
        })
    }

    /// Serialize the header to bytes
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.cc as usize != self.csrc.len() {
            return Err(Error::InvalidParameter(format!(
                "CSRC count ({}) does not match CSRC list length ({})",
                self.cc, self.csrc.len()
            )));
        }

        buf.reserve(self.size());

        let mut first_byte = (self.version & 0x03) << 6;
        if self.padding {
            first_byte |= 1 << 5;
        }
        if self.extension {
            first_byte |= 1 << 4;
        }
        first_byte |= self.cc & 0x0F;
        buf.put_u8(first_byte);

        let mut second_byte = self.payload_type & 0x7F;
        if self.marker {
            second_byte |= 1 << 7;
        }
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if self.extension {
            let (Some(ext_id), Some(ext_data)) = (self.extension_id, &self.extension_data) else {
                return Err(Error::InvalidParameter(
                    "Extension flag is set but extension data is missing".to_string()
                ));
            };

            buf.put_u16(ext_id);
            buf.put_u16(((ext_data.len() + 3) / 4) as u16);
            buf.put_slice(ext_data);

            let padding_bytes = (4 - (ext_data.len() % 4)) % 4;
            buf.put_bytes(0, padding_bytes);
        }

        Ok(())
    }
}

/// RTP packet implementation
#[derive(Clone)]
pub struct RtpPacket {
    /// RTP header
    pub header: RtpHeader,

    /// Payload data (padding removed)
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a new RTP packet
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a new RTP packet with basic parameters
    pub fn new_with_payload(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
        payload: Bytes,
    ) -> Self {
        let header = RtpHeader::new(payload_type, sequence_number, timestamp, ssrc);
        Self { header, payload }
    }

    /// Sequence number of this packet
    pub fn sequence(&self) -> RtpSequenceNumber {
        self.header.sequence_number
    }

    /// Media timestamp of this packet
    pub fn timestamp(&self) -> RtpTimestamp {
        self.header.timestamp
    }

    /// Marker bit
    pub fn marker(&self) -> bool {
        self.header.marker
    }

    /// Get the total size of the packet in bytes (without padding)
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.len()
    }

    /// Parse an RTP packet from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        let header = RtpHeader::parse(&mut buf)?;

        let padding_bytes = if header.padding && !buf.is_empty() {
            let padding = buf[buf.len() - 1] as usize;
            if padding == 0 || padding > buf.len() {
                return Err(Error::InvalidPacket(format!(
                    "Invalid padding value: {} with {} remaining bytes",
                    padding, buf.len()
                )));
            }
            padding
        } else {
            0
        };

        let payload_len = buf.len() - padding_bytes;
        let payload = buf.slice(0..payload_len);

        Ok(Self { header, payload })
    }

    /// Serialize the packet to bytes. The padding flag is cleared on output
    /// since parsed payloads no longer carry their padding.
    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());

        let mut header = self.header.clone();
        header.padding = false;
        header.serialize(&mut buf)?;

        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }
}

impl fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("seq", &self.header.sequence_number)
            .field("ts", &self.header.timestamp)
            .field("marker", &self.header.marker)
            .field("pt", &self.header.payload_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Format bytes as space-separated hex (for debug logging)
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

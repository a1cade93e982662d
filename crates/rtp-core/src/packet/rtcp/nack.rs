use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{RtcpHeader, RtcpPacketType, RTCP_HEADER_SIZE};
use crate::error::Error;
use crate::seq;
use crate::{Result, RtpSequenceNumber, RtpSsrc};

/// Feedback message type of the generic NACK within RTPFB
pub const NACK_FMT: u8 = 1;

/// Number of "following lost packet" bits carried after the base sequence
const BLP_BITS: u16 = 16;

/// One generic NACK FCI entry: a lost packet id plus a bitmask of following
/// lost packets (RFC 4585 Section 6.2.1).
///
/// Bit `k - 1` of `blp` is set when `pid + k` is also lost, for `k = 1..=16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NackPair {
    /// Packet id of the first lost packet
    pub pid: RtpSequenceNumber,

    /// Bitmask of following lost packets
    pub blp: u16,
}

impl NackPair {
    /// Encode a loss set as a single `(pid, blp)` pair.
    ///
    /// The base is the wraparound minimum of the set; sequences further than
    /// 16 past the base do not fit and are ignored. Returns `None` for an
    /// empty set.
    pub fn from_lost(lost: &[RtpSequenceNumber]) -> Option<Self> {
        let sorted = seq::sorted(lost.to_vec());
        let pid = *sorted.first()?;

        let mut blp = 0u16;
        for &s in &sorted[1..] {
            let k = seq::distance(s, pid);
            if (1..=BLP_BITS as i32).contains(&k) {
                blp |= 1 << (k - 1);
            }
        }

        Some(Self { pid, blp })
    }

    /// Every sequence number this pair requests, in order
    pub fn lost_sequences(&self) -> Vec<RtpSequenceNumber> {
        let mut out = vec![self.pid];
        for k in 1..=BLP_BITS {
            if self.blp & (1 << (k - 1)) != 0 {
                out.push(self.pid.wrapping_add(k));
            }
        }
        out
    }
}

/// Split an arbitrary loss set into as few NACK pairs as the bit layout
/// allows. Duplicates are collapsed.
pub fn nack_pairs(lost: &[RtpSequenceNumber]) -> Vec<NackPair> {
    let mut sorted = seq::sorted(lost.to_vec());
    sorted.dedup();

    let mut pairs = Vec::new();
    let mut group_start = 0;
    for i in 1..=sorted.len() {
        let ends_group = i == sorted.len()
            || sorted[i].wrapping_sub(sorted[group_start]) > BLP_BITS;
        if ends_group {
            if let Some(pair) = NackPair::from_lost(&sorted[group_start..i]) {
                pairs.push(pair);
            }
            group_start = i;
        }
    }
    pairs
}

/// RTCP generic NACK packet (RTPFB, FMT=1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpGenericNack {
    /// SSRC of the packet sender (the local receiver)
    pub sender_ssrc: RtpSsrc,

    /// SSRC of the media source the losses belong to
    pub media_ssrc: RtpSsrc,

    /// FCI entries
    pub pairs: Vec<NackPair>,
}

impl RtcpGenericNack {
    /// Create a NACK from explicit pairs
    pub fn new(sender_ssrc: RtpSsrc, media_ssrc: RtpSsrc, pairs: Vec<NackPair>) -> Self {
        Self {
            sender_ssrc,
            media_ssrc,
            pairs,
        }
    }

    /// Create a NACK requesting every sequence in `lost`
    pub fn from_lost(sender_ssrc: RtpSsrc, media_ssrc: RtpSsrc, lost: &[RtpSequenceNumber]) -> Self {
        Self::new(sender_ssrc, media_ssrc, nack_pairs(lost))
    }

    /// Every sequence number requested by this packet
    pub fn lost_sequences(&self) -> Vec<RtpSequenceNumber> {
        self.pairs.iter().flat_map(|p| p.lost_sequences()).collect()
    }

    /// Calculate the total size in bytes
    pub fn size(&self) -> usize {
        RTCP_HEADER_SIZE + 8 + self.pairs.len() * 4
    }

    /// Serialize the full RTCP packet including the common header
    pub fn serialize(&self) -> Result<Bytes> {
        if self.pairs.is_empty() {
            return Err(Error::EncodeError("Generic NACK without FCI entries".to_string()));
        }

        let mut buf = BytesMut::with_capacity(self.size());
        let header = RtcpHeader {
            padding: false,
            count_or_format: NACK_FMT,
            packet_type: RtcpPacketType::TransportFeedback,
            length: (self.size() / 4 - 1) as u16,
        };
        header.serialize(&mut buf);

        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for pair in &self.pairs {
            buf.put_u16(pair.pid);
            buf.put_u16(pair.blp);
        }

        Ok(buf.freeze())
    }

    /// Parse a full RTCP generic NACK packet
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        let header = RtcpHeader::parse(&mut buf)?;

        if header.packet_type != RtcpPacketType::TransportFeedback || header.count_or_format != NACK_FMT {
            return Err(Error::RtcpError(format!(
                "Not a generic NACK: PT={:?} FMT={}",
                header.packet_type, header.count_or_format
            )));
        }

        let body_len = header.packet_size() - RTCP_HEADER_SIZE;
        if buf.remaining() < body_len || body_len < 8 {
            return Err(Error::BufferTooSmall {
                required: body_len.max(8),
                available: buf.remaining(),
            });
        }

        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let fci_count = (body_len - 8) / 4;
        let pairs = (0..fci_count)
            .map(|_| NackPair {
                pid: buf.get_u16(),
                blp: buf.get_u16(),
            })
            .collect();

        Ok(Self {
            sender_ssrc,
            media_ssrc,
            pairs,
        })
    }
}

//! Interfaces to the outside world: the consumer of released frames and the
//! transport that carries retransmission requests back to the sender.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use vjitter_rtp_core::{RtcpGenericNack, RtpPacket, RtpSsrc};

use crate::codec::VideoCodec;
use crate::error::Result;

/// Media type a feedback message refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
}

/// One packet of a released frame, ready for the decoder
#[derive(Debug, Clone)]
pub struct ForwardedPacket {
    /// Frame the packet belongs to
    pub frame_id: i64,
    /// The packet as received
    pub packet: RtpPacket,
    /// Payload type to forward with
    pub payload_type: u8,
    /// Media clock rate in Hz
    pub clock_rate: u32,
    pub codec: VideoCodec,
}

impl ForwardedPacket {
    pub fn payload(&self) -> &Bytes {
        &self.packet.payload
    }

    pub fn sequence(&self) -> u16 {
        self.packet.sequence()
    }
}

/// Receives the packets of released frames, in sequence order
pub trait FrameSink: Send + Sync {
    /// Forward one packet. Errors are logged by the caller and do not stop
    /// the remaining packets of the frame.
    fn forward(&self, packet: ForwardedPacket) -> Result<()>;
}

/// Sends generic NACK feedback to the media sender
pub trait FeedbackTransport: Send + Sync {
    /// SSRC the local side sends feedback as
    fn local_ssrc(&self) -> RtpSsrc;

    /// Send one feedback message
    fn send_feedback(&self, media_type: MediaType, nack: RtcpGenericNack) -> Result<()>;
}

/// A feedback message queued by [`ChannelFeedbackTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackMessage {
    pub media_type: MediaType,
    pub nack: RtcpGenericNack,
}

/// [`FrameSink`] that pushes packets into a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelFrameSink {
    tx: mpsc::Sender<ForwardedPacket>,
}

impl ChannelFrameSink {
    /// Create a sink and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ForwardedPacket>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelFrameSink {
    fn forward(&self, packet: ForwardedPacket) -> Result<()> {
        trace!("Forwarding packet {} of frame {}", packet.sequence(), packet.frame_id);
        self.tx.try_send(packet)?;
        Ok(())
    }
}

/// [`FeedbackTransport`] that queues NACKs into a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelFeedbackTransport {
    local_ssrc: RtpSsrc,
    tx: mpsc::Sender<FeedbackMessage>,
}

impl ChannelFeedbackTransport {
    /// Create a transport sending as `local_ssrc` and the receiving end of its channel
    pub fn new(local_ssrc: RtpSsrc, capacity: usize) -> (Self, mpsc::Receiver<FeedbackMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { local_ssrc, tx }, rx)
    }
}

impl FeedbackTransport for ChannelFeedbackTransport {
    fn local_ssrc(&self) -> RtpSsrc {
        self.local_ssrc
    }

    fn send_feedback(&self, media_type: MediaType, nack: RtcpGenericNack) -> Result<()> {
        self.tx.try_send(FeedbackMessage { media_type, nack })?;
        Ok(())
    }
}

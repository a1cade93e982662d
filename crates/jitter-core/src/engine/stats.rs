/// Statistics for the jitter buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStats {
    /// Number of packets received
    pub packets_received: u64,
    /// Packets dropped for being older than the target latency
    pub late_packets: u64,
    /// Packets whose sequence was already stored
    pub duplicate_packets: u64,
    /// Packets for frames that were already released
    pub stale_packets: u64,
    /// Packets that answered a retransmission request
    pub recovered_packets: u64,
    /// Frames handed to the sink
    pub frames_released: u64,
    /// Released frames that were not fully assembled
    pub frames_partial: u64,
    /// NACK messages sent
    pub nack_messages: u64,
    /// Sequence numbers requested across all NACK messages
    pub nack_sequences: u64,
    /// NACK messages the transport failed to send
    pub feedback_failures: u64,
    /// Packets handed to the sink
    pub packets_forwarded: u64,
    /// Packets the sink refused
    pub forward_failures: u64,
    /// Frames currently buffered
    pub live_frames: usize,
    /// Current inter-arrival latency estimate in milliseconds
    pub estimated_latency_ms: Option<i64>,
    /// Mean retransmission round trip in milliseconds
    pub mean_rtt_ms: Option<i64>,
}

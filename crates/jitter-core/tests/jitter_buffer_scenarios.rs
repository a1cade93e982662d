//! End-to-end jitter buffer behaviour on a deterministic clock

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use vjitter_core::prelude::*;
use vjitter_rtp_core::RtpSsrc;

const MEDIA_SSRC: u32 = 0x0bad_cafe;
const LOCAL_SSRC: u32 = 0x0000_f00d;
const TICKS_PER_FRAME: u32 = 3600;
const BASE_TIMESTAMP: u32 = 90_000;

#[derive(Default)]
struct RecordingSink {
    packets: Mutex<Vec<ForwardedPacket>>,
    /// Sequence the decoder refuses
    reject: Option<u16>,
}

impl FrameSink for RecordingSink {
    fn forward(&self, packet: ForwardedPacket) -> vjitter_core::Result<()> {
        if self.reject == Some(packet.sequence()) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "decoder went away").into());
        }
        self.packets.lock().push(packet);
        Ok(())
    }
}

impl RecordingSink {
    fn sequences(&self) -> Vec<u16> {
        self.packets.lock().iter().map(|p| p.sequence()).collect()
    }
}

#[derive(Default)]
struct RecordingFeedback {
    sent: Mutex<Vec<RtcpGenericNack>>,
    offline: bool,
}

impl FeedbackTransport for RecordingFeedback {
    fn local_ssrc(&self) -> RtpSsrc {
        LOCAL_SSRC
    }

    fn send_feedback(&self, media_type: MediaType, nack: RtcpGenericNack) -> vjitter_core::Result<()> {
        assert_eq!(media_type, MediaType::Video);
        if self.offline {
            return Err(Error::Feedback("transport offline".to_string()));
        }
        self.sent.lock().push(nack);
        Ok(())
    }
}

impl RecordingFeedback {
    fn take(&self) -> Vec<Vec<u16>> {
        self.sent.lock().drain(..).map(|n| n.lost_sequences()).collect()
    }
}

struct Stream {
    engine: JitterBufferEngine,
    clock: ManualClock,
    elapsed_ms: u64,
    sink: Arc<RecordingSink>,
    feedback: Arc<RecordingFeedback>,
}

impl Stream {
    fn new(config: JitterBufferConfig) -> Self {
        Self::with_doubles(config, RecordingSink::default(), RecordingFeedback::default())
    }

    fn with_doubles(config: JitterBufferConfig, sink: RecordingSink, feedback: RecordingFeedback) -> Self {
        let clock = ManualClock::new();
        let sink = Arc::new(sink);
        let feedback = Arc::new(feedback);
        let engine = JitterBufferEngine::with_clock(
            config,
            sink.clone(),
            feedback.clone(),
            Arc::new(clock.clone()),
        )
        .unwrap();

        Self { engine, clock, elapsed_ms: 0, sink, feedback }
    }

    fn send_at(&mut self, at_ms: u64, seq_num: u16, frame: u32, marker: bool) {
        self.clock.advance_ms(at_ms - self.elapsed_ms);
        self.elapsed_ms = at_ms;

        let mut packet = RtpPacket::new_with_payload(
            96,
            seq_num,
            BASE_TIMESTAMP + frame * TICKS_PER_FRAME,
            MEDIA_SSRC,
            Bytes::from(format!("nal-{}", seq_num)),
        );
        packet.header.marker = marker;
        self.engine.receive_packet(packet);
    }

    fn tick(&self, count: usize) -> usize {
        (0..count).map(|_| self.engine.playback_tick()).sum()
    }
}

#[test]
fn test_in_order_frame_released_after_target_latency() {
    let mut stream = Stream::new(JitterBufferConfig::default());
    for (i, seq_num) in (100..=105).enumerate() {
        stream.send_at(i as u64 * 5, seq_num, 0, seq_num == 105);
    }

    // Frame is 25ms old at the last arrival; nothing leaves before 400ms
    assert_eq!(stream.tick(35), 0);
    assert!(stream.sink.sequences().is_empty());

    assert_eq!(stream.tick(15), 1);
    let forwarded = stream.sink.packets.lock().clone();
    assert_eq!(forwarded.len(), 6);
    for (packet, seq_num) in forwarded.iter().zip(100..=105) {
        assert_eq!(packet.sequence(), seq_num);
        assert_eq!(packet.payload(), &Bytes::from(format!("nal-{}", seq_num)));
        assert_eq!(packet.payload_type, 96);
        assert_eq!(packet.clock_rate, 90_000);
        assert_eq!(packet.codec, VideoCodec::H264);
    }

    assert!(stream.feedback.take().is_empty());
    assert_eq!(stream.engine.live_frames(), 0);
}

#[test]
fn test_single_loss_requested_once_then_recovered() {
    let mut stream = Stream::new(JitterBufferConfig::default());

    for (i, seq_num) in (100..=105).enumerate() {
        stream.send_at(i as u64 * 5, seq_num, 0, seq_num == 105);
    }
    // Frame 1 loses 108
    stream.send_at(30, 106, 1, false);
    stream.send_at(35, 107, 1, false);
    stream.send_at(40, 109, 1, false);
    stream.send_at(45, 110, 1, true);
    assert!(stream.feedback.take().is_empty());

    // Well past twice the estimated latency
    stream.send_at(150, 111, 2, false);
    assert_eq!(stream.feedback.take(), vec![vec![108]]);

    // Inside the backoff interval nothing is repeated
    stream.send_at(200, 112, 2, true);
    assert!(stream.feedback.take().is_empty());

    stream.send_at(220, 108, 1, false);
    stream.send_at(300, 113, 3, true);
    stream.send_at(500, 114, 4, true);
    let later: Vec<u16> = stream.feedback.take().into_iter().flatten().collect();
    assert!(!later.contains(&108));

    let stats = stream.engine.stats();
    assert_eq!(stats.recovered_packets, 1);
    assert_eq!(stats.mean_rtt_ms, Some(70));
    assert_eq!(stats.late_packets, 0);

    stream.tick(80);
    assert_eq!(stream.sink.sequences(), (100..=114).collect::<Vec<u16>>());

    let stats = stream.engine.stats();
    assert_eq!(stats.frames_released, 5);
    // Frame 0 has no predecessor to give it a first bound
    assert_eq!(stats.frames_partial, 1);
}

#[test]
fn test_nack_wire_addressing() {
    let mut stream = Stream::new(JitterBufferConfig::default());
    stream.send_at(0, 10, 0, false);
    stream.send_at(5, 11, 0, true);
    stream.send_at(40, 12, 1, false);
    stream.send_at(45, 15, 1, true);
    stream.send_at(100, 16, 2, true);

    let sent = stream.feedback.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].sender_ssrc, LOCAL_SSRC);
    assert_eq!(sent[0].media_ssrc, MEDIA_SSRC);
    assert_eq!(sent[0].pairs, vec![vjitter_rtp_core::NackPair { pid: 13, blp: 0b1 }]);

    let bytes = sent[0].serialize().unwrap();
    assert_eq!(RtcpGenericNack::parse(&bytes).unwrap(), sent[0]);
}

#[test]
fn test_latency_estimate_is_arrival_gap() {
    let mut stream = Stream::new(JitterBufferConfig::default());
    stream.send_at(0, 1, 0, false);
    assert_eq!(stream.engine.stats().estimated_latency_ms, None);

    stream.send_at(17, 2, 0, true);
    assert_eq!(stream.engine.stats().estimated_latency_ms, Some(17));
}

#[test]
fn test_live_frames_never_outlive_target_latency() {
    let config = JitterBufferConfig::default();
    let target = config.target_latency_ms as i64;
    let tick_ms = config.playback_tick_ms as i64;
    let mut stream = Stream::new(config);

    let frames = 60u32;
    let mut t = 0u64;
    for step in 0..(frames as u64 * 4 + 60) {
        t = step * 10;
        if step % 4 == 0 && step / 4 < frames as u64 {
            let frame = (step / 4) as u32;
            let base = frame as u16 * 3;
            for k in 0..3u16 {
                // Every seventh frame loses its middle packet
                if frame % 7 == 3 && k == 1 {
                    continue;
                }
                stream.send_at(t, base + k, frame, k == 2);
            }
        }

        stream.engine.playback_tick();

        let now_ms = 1000 + t as i64;
        for id in stream.engine.live_frame_ids() {
            let presented_ms = 1000 + id * 40;
            assert!(
                presented_ms >= now_ms - target - tick_ms,
                "frame {} at {}ms still live at {}ms",
                id,
                presented_ms,
                now_ms
            );
        }
    }

    assert!(t > 0);
    assert_eq!(stream.engine.live_frames(), 0);
    assert_eq!(stream.engine.stats().frames_released, frames as u64);
}

#[test]
fn test_reordered_frame_assembles() {
    let mut stream = Stream::new(JitterBufferConfig::default().with_target_latency_ms(100));
    stream.send_at(0, 200, 0, false);
    stream.send_at(2, 201, 0, true);

    for (i, seq_num) in [205u16, 203, 202, 206, 204].into_iter().enumerate() {
        stream.send_at(40 + i as u64 * 2, seq_num, 1, seq_num == 206);
    }

    stream.tick(30);
    assert_eq!(stream.sink.sequences(), vec![200, 201, 202, 203, 204, 205, 206]);
    assert_eq!(stream.engine.stats().frames_partial, 1);
}

#[test]
fn test_forward_failure_skips_only_that_packet() {
    let sink = RecordingSink { reject: Some(101), ..Default::default() };
    let config = JitterBufferConfig::default().with_target_latency_ms(50);
    let mut stream = Stream::with_doubles(config, sink, RecordingFeedback::default());

    stream.send_at(0, 100, 0, false);
    stream.send_at(1, 101, 0, false);
    stream.send_at(2, 102, 0, true);
    stream.send_at(40, 103, 1, false);
    stream.send_at(41, 104, 1, true);

    assert_eq!(stream.tick(30), 2);
    assert_eq!(stream.sink.sequences(), vec![100, 102, 103, 104]);

    let stats = stream.engine.stats();
    assert_eq!(stats.forward_failures, 1);
    assert_eq!(stats.packets_forwarded, 4);
    assert_eq!(stats.frames_released, 2);
    assert_eq!(stream.engine.live_frames(), 0);
}

#[test]
fn test_feedback_failure_is_counted_and_tolerated() {
    let feedback = RecordingFeedback { offline: true, ..Default::default() };
    let mut stream = Stream::with_doubles(JitterBufferConfig::default(), RecordingSink::default(), feedback);

    for (i, seq_num) in (100..=105).enumerate() {
        stream.send_at(i as u64 * 5, seq_num, 0, seq_num == 105);
    }
    stream.send_at(30, 106, 1, false);
    stream.send_at(35, 107, 1, false);
    stream.send_at(40, 109, 1, false);
    stream.send_at(45, 110, 1, true);
    stream.send_at(150, 111, 2, false);

    let stats = stream.engine.stats();
    assert_eq!(stats.nack_messages, 1);
    assert_eq!(stats.feedback_failures, 1);

    // 108 never comes back; frame 1 still plays out without it
    assert_eq!(stream.tick(80), 3);
    let mut expected: Vec<u16> = (100..=111).collect();
    expected.retain(|&s| s != 108);
    assert_eq!(stream.sink.sequences(), expected);
    assert_eq!(stream.engine.stats().frames_partial, 3);
}

#[test]
fn test_frame_spread_over_sequence_domain_plays_out() {
    let mut stream = Stream::new(JitterBufferConfig::default().with_target_latency_ms(50));

    let sent: Vec<u16> = (0..64u16).map(|i| i * 1024 + (i * 37) % 1000).collect();
    for &seq_num in &sent {
        stream.send_at(0, seq_num, 0, false);
    }

    assert_eq!(stream.tick(50), 1);
    let mut forwarded = stream.sink.sequences();
    assert_eq!(forwarded.len(), sent.len());
    forwarded.sort_unstable();
    assert_eq!(forwarded, sent);

    // Playback keeps running for the frames that follow
    stream.send_at(40, 64843u16.wrapping_add(10), 1, true);
    assert_eq!(stream.tick(20), 1);
    assert_eq!(stream.engine.stats().frames_released, 2);
}

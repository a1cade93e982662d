//! The jitter buffer engine
//!
//! [`JitterBufferEngine`] owns the live frames of one received video stream.
//! The receive path feeds packets into per-frame assemblers and requests lost
//! sequences; the playback path releases frames once they are older than the
//! target latency. Both run against one briefly held lock and do all I/O
//! (feedback and sink forwarding) after releasing it.

mod clock;
mod playback;
mod stats;

pub use clock::{Clock, ManualClock, MediaClock, SystemClock};
pub use playback::{PlaybackClock, PlaybackHandle};
pub use stats::JitterBufferStats;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use vjitter_rtp_core::packet::rtcp::nack_pairs;
use vjitter_rtp_core::seq::TimestampUnwrapper;
use vjitter_rtp_core::time::ticks_per_frame;
use vjitter_rtp_core::{RtcpGenericNack, RtpPacket, RtpSequenceNumber, RtpSsrc};

use crate::codec::VideoCodec;
use crate::config::JitterBufferConfig;
use crate::error::{Error, Result};
use crate::frame::{FrameAssembler, FrameParams, PacketOutcome, RetransmissionRtt};
use crate::latency::LatencyEstimator;
use crate::sink::{FeedbackTransport, ForwardedPacket, FrameSink, MediaType};

/// Losses to request for one frame
#[derive(Debug)]
struct LossReport {
    frame_id: i64,
    lost: Vec<RtpSequenceNumber>,
}

struct EngineState {
    config: JitterBufferConfig,

    /// Frame id -> assembler for every frame not yet released
    frames: BTreeMap<i64, FrameAssembler>,
    /// Most recently released frame, kept so its successor can derive a first bound
    retired: Option<FrameAssembler>,
    last_released: Option<i64>,

    /// Sequences requested for presumed wholly lost frames -> media time of the guess
    lost_frame_guesses: HashMap<RtpSequenceNumber, i64>,

    estimator: LatencyEstimator,
    rtt: RetransmissionRtt,
    unwrapper: TimestampUnwrapper,
    first_timestamp: Option<i64>,
    media_clock: MediaClock,
    /// Latest estimated media time in milliseconds
    current_ms: i64,
    playback: PlaybackClock,

    media_ssrc: RtpSsrc,
    stats: JitterBufferStats,
}

impl EngineState {
    fn new(config: JitterBufferConfig) -> Self {
        Self {
            estimator: LatencyEstimator::new(config.latency_window),
            media_clock: MediaClock::new(config.clock_rate),
            config,
            frames: BTreeMap::new(),
            retired: None,
            last_released: None,
            lost_frame_guesses: HashMap::new(),
            rtt: RetransmissionRtt::new(),
            unwrapper: TimestampUnwrapper::new(),
            first_timestamp: None,
            current_ms: 0,
            playback: PlaybackClock::new(),
            media_ssrc: 0,
            stats: JitterBufferStats::default(),
        }
    }

    fn target_ms(&self) -> i64 {
        self.config.target_latency_ms as i64
    }

    fn frame_params(&self) -> FrameParams {
        FrameParams {
            strategy: self.config.strategy(),
            best_effort_overshoot: self.config.best_effort_overshoot,
        }
    }

    fn frame_id(&mut self, timestamp: i64) -> i64 {
        let first = *self.first_timestamp.get_or_insert(timestamp);
        let per_frame = ticks_per_frame(self.config.clock_rate, self.config.frame_rate);
        (timestamp - first).div_euclid(per_frame)
    }

    /// Final bound of frame `id`, including the retired frame
    fn final_of(&self, id: i64) -> Option<RtpSequenceNumber> {
        match self.frames.get(&id) {
            Some(frame) => frame.final_bound(),
            None => self
                .retired
                .as_ref()
                .filter(|f| f.frame_id() == id)
                .and_then(|f| f.final_bound()),
        }
    }

    fn has_frame(&self, id: i64) -> bool {
        self.frames.contains_key(&id) || self.retired.as_ref().is_some_and(|f| f.frame_id() == id)
    }

    /// Push boundary information between `id` and its live neighbours
    fn link_neighbours(&mut self, id: i64, outcome: PacketOutcome, created: bool) {
        let Some(min_seq) = self.frames.get(&id).map(|f| f.min_seq()) else {
            return;
        };

        if created || outcome.min_lowered {
            let predecessor_final = self
                .frames
                .get_mut(&(id - 1))
                .and_then(|prev| prev.set_next_frame_min(min_seq).then(|| prev.final_bound()).flatten());
            if let (Some(prev_final), Some(frame)) = (predecessor_final, self.frames.get_mut(&id)) {
                frame.set_first(prev_final.wrapping_add(1));
            }
        }

        let mut final_changed = outcome.final_changed;
        if created {
            if let Some(next_min) = self.frames.get(&(id + 1)).map(|f| f.min_seq()) {
                if let Some(frame) = self.frames.get_mut(&id) {
                    final_changed |= frame.set_next_frame_min(next_min);
                }
            }
        }

        if created || final_changed {
            let final_bound = self.frames.get(&id).and_then(|f| f.final_bound());
            if let (Some(last), Some(next)) = (final_bound, self.frames.get_mut(&(id + 1))) {
                next.set_first(last.wrapping_add(1));
            }
        }
    }

    /// Guess sequences of up to `max_guessed_lost_frames` predecessor frames
    /// that never produced a packet
    fn guess_lost_frames(&mut self, id: i64, now_ms: i64) -> Vec<RtpSequenceNumber> {
        let Some(min_seq) = self.frames.get(&id).map(|f| f.min_seq()) else {
            return Vec::new();
        };

        let mut guessed = Vec::new();
        for i in 0..self.config.max_guessed_lost_frames {
            let candidate = id - i as i64 - 1;
            if candidate < 0 || self.last_released.is_some_and(|r| candidate <= r) {
                break;
            }
            if self.has_frame(candidate) {
                continue;
            }
            let seq_num = min_seq.wrapping_sub(1).wrapping_sub(i as u16);
            if !self.lost_frame_guesses.contains_key(&seq_num) {
                self.lost_frame_guesses.insert(seq_num, now_ms);
                guessed.push(seq_num);
            }
        }

        if !guessed.is_empty() {
            debug!("Frame {} has no predecessor, guessing lost sequences {:?}", id, guessed);
        }
        guessed
    }

    fn expire_guesses(&mut self, now_ms: i64) {
        let target = self.target_ms();
        self.lost_frame_guesses.retain(|_, guessed_at| now_ms - *guessed_at <= target);
    }

    fn collect_losses(&mut self, now_ms: i64, latency_ms: i64) -> Vec<LossReport> {
        let budget = self.target_ms();
        let backoff = self.rtt.backoff_ms(self.config.min_nack_backoff_ms as i64);

        self.frames
            .values_mut()
            .filter_map(|frame| {
                let lost = frame.check_lost_packets(now_ms, latency_ms, budget, backoff);
                (!lost.is_empty()).then(|| LossReport {
                    frame_id: frame.frame_id(),
                    lost,
                })
            })
            .collect()
    }
}

struct Shared {
    state: Mutex<EngineState>,
    sink: Arc<dyn FrameSink>,
    feedback: Arc<dyn FeedbackTransport>,
    clock: Arc<dyn Clock>,
}

/// Receive-side jitter buffer for one video stream.
///
/// Cloning is cheap; clones share the same buffer.
#[derive(Clone)]
pub struct JitterBufferEngine {
    shared: Arc<Shared>,
}

impl JitterBufferEngine {
    /// Create an engine on the system clock
    pub fn new(
        config: JitterBufferConfig,
        sink: Arc<dyn FrameSink>,
        feedback: Arc<dyn FeedbackTransport>,
    ) -> Result<Self> {
        Self::with_clock(config, sink, feedback, Arc::new(SystemClock))
    }

    /// Create an engine driven by `clock`
    pub fn with_clock(
        config: JitterBufferConfig,
        sink: Arc<dyn FrameSink>,
        feedback: Arc<dyn FeedbackTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Jitter buffer created: codec={} clock_rate={} target_latency={}ms nack={}",
            config.codec, config.clock_rate, config.target_latency_ms, config.nack_enabled
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::new(config)),
                sink,
                feedback,
                clock,
            }),
        })
    }

    /// Handle one received RTP packet.
    ///
    /// Late and stale packets are dropped here; feedback is sent for any
    /// newly detected losses before returning.
    pub fn receive_packet(&self, packet: RtpPacket) {
        let now = self.shared.clock.now();
        let seq_num = packet.sequence();

        let (reports, guessed, nack_enabled, media_ssrc) = {
            let mut state = self.shared.state.lock();
            state.stats.packets_received += 1;

            let timestamp = state.unwrapper.unwrap(packet.timestamp());
            let now_ms = state.media_clock.observe(timestamp, now);
            state.current_ms = now_ms;

            let packet_ms = state.media_clock.to_millis(timestamp);
            if now_ms - packet_ms > state.target_ms() {
                debug!(
                    "Dropping late packet {}: {}ms old, target {}ms",
                    seq_num,
                    now_ms - packet_ms,
                    state.target_ms()
                );
                state.stats.late_packets += 1;
                return;
            }

            state.estimator.insert(timestamp, now_ms);
            let latency_ms = state.estimator.estimate();
            state.media_ssrc = packet.header.ssrc;

            let id = state.frame_id(timestamp);
            if state.last_released.is_some_and(|r| id <= r) {
                debug!("Dropping packet {} for already released frame {}", seq_num, id);
                state.stats.stale_packets += 1;
                return;
            }

            if state.lost_frame_guesses.remove(&seq_num).is_some() {
                debug!("Guessed lost packet {} arrived for frame {}", seq_num, id);
            }

            let mut guessed = Vec::new();
            let state = &mut *state;
            match state.frames.get_mut(&id) {
                Some(frame) => {
                    let outcome = frame.add_packet(packet, now_ms, &mut state.rtt);
                    if outcome.duplicate {
                        state.stats.duplicate_packets += 1;
                    }
                    if outcome.retransmitted {
                        state.stats.recovered_packets += 1;
                    }
                    state.link_neighbours(id, outcome, false);
                }
                None => {
                    let start_hint = state.final_of(id - 1).map(|s| s.wrapping_add(1));
                    let first_of_stream = state.frames.is_empty() && state.last_released.is_none();
                    let frame = FrameAssembler::new(id, packet, timestamp, now_ms, start_hint, state.frame_params());
                    trace!("Frame {} created at {}ms with first hint {:?}", id, now_ms, start_hint);
                    state.frames.insert(id, frame);
                    state.link_neighbours(id, PacketOutcome::default(), true);

                    if !first_of_stream && !state.has_frame(id - 1) {
                        guessed = state.guess_lost_frames(id, now_ms);
                    }
                }
            }

            let reports = match latency_ms {
                Some(latency_ms) => state.collect_losses(now_ms, latency_ms),
                None => Vec::new(),
            };
            state.expire_guesses(now_ms);

            let nack_enabled = state.config.nack_enabled;
            if nack_enabled {
                state.stats.nack_messages += reports.len() as u64 + u64::from(!guessed.is_empty());
                state.stats.nack_sequences +=
                    reports.iter().map(|r| r.lost.len() as u64).sum::<u64>() + guessed.len() as u64;
            }

            (reports, guessed, nack_enabled, state.media_ssrc)
        };

        if !nack_enabled {
            return;
        }

        let local_ssrc = self.shared.feedback.local_ssrc();
        for report in reports {
            debug!("NACK for frame {}: {:?}", report.frame_id, report.lost);
            self.send_nack(RtcpGenericNack::from_lost(local_ssrc, media_ssrc, &report.lost));
        }
        if !guessed.is_empty() {
            self.send_nack(RtcpGenericNack::new(local_ssrc, media_ssrc, nack_pairs(&guessed)));
        }
    }

    fn send_nack(&self, nack: RtcpGenericNack) {
        if let Err(e) = self.shared.feedback.send_feedback(MediaType::Video, nack) {
            warn!("Failed to send NACK: {}", e);
            self.shared.state.lock().stats.feedback_failures += 1;
        }
    }

    /// Run one playback tick: release every frame whose presentation time is
    /// older than the playout time minus the target latency.
    ///
    /// Returns the number of frames released.
    pub fn playback_tick(&self) -> usize {
        let mut released: Vec<ForwardedPacket> = Vec::new();
        let mut frames_released = 0;

        {
            let mut state = self.shared.state.lock();
            let state = &mut *state;
            let current_ms = state.current_ms;

            if state.frames.is_empty() {
                state.playback.resync(current_ms);
                return 0;
            }

            let tick_ms = state.config.playback_tick_ms as i64;
            let threshold = state.playback.playout_ms(current_ms, tick_ms) - state.target_ms();

            while let Some(entry) = state.frames.first_entry() {
                let frame_ms = state.media_clock.to_millis(entry.get().timestamp());
                if frame_ms >= threshold {
                    break;
                }
                let frame = entry.remove();
                let id = frame.frame_id();

                let assembled = frame.is_assembled();
                let packets = frame.packets_to_send();
                if !assembled {
                    debug!(
                        "Releasing frame {} partially with {} packet(s)",
                        id,
                        packets.len()
                    );
                    state.stats.frames_partial += 1;
                } else {
                    trace!(
                        "Releasing frame {} with {} packet(s) after {}ms buffered",
                        id,
                        packets.len(),
                        current_ms - frame.first_arrival_ms()
                    );
                }

                released.extend(packets.into_iter().map(|packet| ForwardedPacket {
                    frame_id: id,
                    payload_type: packet.header.payload_type,
                    clock_rate: state.config.clock_rate,
                    codec: state.config.codec,
                    packet,
                }));

                if let Some(mut predecessor) = state.retired.replace(frame) {
                    predecessor.dispose();
                }
                state.last_released = Some(id);
                state.stats.frames_released += 1;
                frames_released += 1;
            }

            state.playback.advance(current_ms);
        }

        let mut forwarded = 0u64;
        let mut failures = 0u64;
        for packet in released {
            let seq_num = packet.sequence();
            match self.shared.sink.forward(packet) {
                Ok(()) => forwarded += 1,
                Err(e) => {
                    warn!("Failed to forward packet {}: {}", seq_num, e);
                    failures += 1;
                }
            }
        }
        if forwarded + failures > 0 {
            let mut state = self.shared.state.lock();
            state.stats.packets_forwarded += forwarded;
            state.stats.forward_failures += failures;
        }

        frames_released
    }

    /// Spawn the playback loop on the current tokio runtime
    pub fn start_playback(&self) -> PlaybackHandle {
        let tick = self.shared.state.lock().config.playback_tick();
        playback::spawn(self.clone(), tick)
    }

    /// Change the target latency
    pub fn set_latency(&self, latency_ms: u32) {
        let mut state = self.shared.state.lock();
        info!("Target latency {}ms -> {}ms", state.config.target_latency_ms, latency_ms);
        state.config.target_latency_ms = latency_ms;
    }

    /// Change codec and clock rate; frames created from now on use them
    pub fn set_format(&self, codec: VideoCodec, clock_rate: u32) -> Result<()> {
        if clock_rate == 0 {
            return Err(Error::invalid_parameter("clock_rate must be greater than 0"));
        }
        let mut state = self.shared.state.lock();
        info!("Video format set to {} at {}Hz", codec, clock_rate);
        state.config.codec = codec;
        state.config.clock_rate = clock_rate;
        state.media_clock.set_clock_rate(clock_rate);
        Ok(())
    }

    /// Enable or disable NACK feedback
    pub fn set_nack_enabled(&self, enabled: bool) {
        self.shared.state.lock().config.nack_enabled = enabled;
    }

    pub fn target_latency_ms(&self) -> u32 {
        self.shared.state.lock().config.target_latency_ms
    }

    /// A copy of the active configuration
    pub fn config(&self) -> JitterBufferConfig {
        self.shared.state.lock().config.clone()
    }

    /// Number of frames not yet released
    pub fn live_frames(&self) -> usize {
        self.shared.state.lock().frames.len()
    }

    /// Ids of the frames not yet released, oldest first
    pub fn live_frame_ids(&self) -> Vec<i64> {
        self.shared.state.lock().frames.keys().copied().collect()
    }

    /// Latest estimated media time in milliseconds
    pub fn current_ms(&self) -> i64 {
        self.shared.state.lock().current_ms
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> JitterBufferStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.live_frames = state.frames.len();
        stats.estimated_latency_ms = state.estimator.estimate();
        stats.mean_rtt_ms = state.rtt.mean_ms();
        stats
    }
}

//! Per-frame packet assembly
//!
//! A [`FrameAssembler`] collects the packets that share one frame id, works out
//! which sequence numbers the frame spans and reports the ones that are still
//! missing so the engine can request them.
//!
//! The span is `first..=final`. `first` comes from the predecessor frame
//! (`predecessor.final + 1`); `final` comes from the codec's boundary strategy,
//! either the marker-carrying packet or one before the successor's lowest
//! sequence. Until both are known the frame is handled best-effort.

mod retransmit;

pub use retransmit::{PendingRetransmission, RetransmissionRtt, RTT_SAMPLES};

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};
use vjitter_rtp_core::{seq, RtpPacket, RtpSequenceNumber};

use crate::codec::BoundaryStrategy;

/// Upper bound on packets a single frame may span
pub const MAX_FRAME_SPAN: usize = 4096;

/// Per-frame settings captured when the assembler is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParams {
    pub strategy: BoundaryStrategy,
    /// Sequences scanned past the observed maximum in best-effort mode
    pub best_effort_overshoot: u16,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            strategy: BoundaryStrategy::EndMarker,
            best_effort_overshoot: 3,
        }
    }
}

/// What changed when a packet was absorbed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketOutcome {
    /// A packet with the same sequence was already stored
    pub duplicate: bool,
    /// The packet answered an outstanding retransmission request
    pub retransmitted: bool,
    /// The observed minimum sequence moved earlier
    pub min_lowered: bool,
    /// The final bound was set or moved
    pub final_changed: bool,
}

/// Collects the packets of one frame
#[derive(Debug)]
pub struct FrameAssembler {
    frame_id: i64,
    /// Extended RTP timestamp of the frame
    timestamp: i64,
    first_arrival_ms: i64,
    /// Last arrival that was not a retransmission
    last_arrival_ms: i64,
    params: FrameParams,

    packets: HashMap<RtpSequenceNumber, RtpPacket>,
    min_seq: RtpSequenceNumber,
    max_seq: RtpSequenceNumber,

    first_bound: Option<RtpSequenceNumber>,
    final_bound: Option<RtpSequenceNumber>,
    next_frame_min: Option<RtpSequenceNumber>,

    /// Slots for `first..=final`, present once both bounds are known
    range: Option<Vec<Option<RtpPacket>>>,
    filled: usize,

    pending: HashMap<RtpSequenceNumber, PendingRetransmission>,
    abandoned: HashSet<RtpSequenceNumber>,
    disposed: bool,
}

impl FrameAssembler {
    /// Create an assembler from the first packet seen for `frame_id`.
    ///
    /// `start_hint` is the predecessor's final sequence plus one, when known.
    pub fn new(
        frame_id: i64,
        packet: RtpPacket,
        timestamp: i64,
        arrival_ms: i64,
        start_hint: Option<RtpSequenceNumber>,
        params: FrameParams,
    ) -> Self {
        let seq_num = packet.sequence();
        let mut frame = Self {
            frame_id,
            timestamp,
            first_arrival_ms: arrival_ms,
            last_arrival_ms: arrival_ms,
            params,
            packets: HashMap::new(),
            min_seq: seq_num,
            max_seq: seq_num,
            first_bound: None,
            final_bound: None,
            next_frame_min: None,
            range: None,
            filled: 0,
            pending: HashMap::new(),
            abandoned: HashSet::new(),
            disposed: false,
        };

        if params.strategy.marker_closes_frame(packet.marker()) {
            frame.final_bound = Some(seq_num);
        }
        frame.packets.insert(seq_num, packet);

        if let Some(hint) = start_hint {
            frame.set_first(hint);
        }

        frame.rebuild_range();
        frame
    }

    /// Absorb a packet of this frame arriving at `arrival_ms`.
    ///
    /// A packet answering an outstanding request feeds its round trip into
    /// `rtt` and does not count as a fresh arrival for the pre-request guard.
    pub fn add_packet(
        &mut self,
        packet: RtpPacket,
        arrival_ms: i64,
        rtt: &mut RetransmissionRtt,
    ) -> PacketOutcome {
        let mut outcome = PacketOutcome::default();
        if self.disposed {
            debug!("Frame {} is disposed, dropping packet {}", self.frame_id, packet.sequence());
            return outcome;
        }

        let seq_num = packet.sequence();
        let marker = packet.marker();

        match self.pending.remove(&seq_num) {
            Some(request) => {
                outcome.retransmitted = true;
                rtt.record(arrival_ms - request.last_send_ms);
                trace!(
                    "Frame {} recovered packet {} after {} request(s)",
                    self.frame_id, seq_num, request.send_count
                );
            }
            None => self.last_arrival_ms = arrival_ms,
        }
        self.abandoned.remove(&seq_num);

        outcome.duplicate = self.packets.insert(seq_num, packet.clone()).is_some();

        if seq::before(seq_num, self.min_seq) {
            self.min_seq = seq_num;
            outcome.min_lowered = true;
        }
        if seq::before(self.max_seq, seq_num) {
            self.max_seq = seq_num;
        }

        let mut rebuild = false;

        if self.params.strategy.marker_closes_frame(marker) && self.final_bound != Some(seq_num) {
            let new_final = match self.final_bound {
                Some(old) => {
                    warn!(
                        "Frame {} has a second end marker at {} (was {})",
                        self.frame_id, seq_num, old
                    );
                    seq::latest(old, seq_num)
                }
                None => seq_num,
            };
            if self.final_bound != Some(new_final) {
                self.final_bound = Some(new_final);
                outcome.final_changed = true;
                rebuild = true;
            }
        }

        if let Some(first) = self.first_bound {
            if seq::before(seq_num, first) {
                warn!(
                    "Frame {} packet {} precedes first bound {}, widening",
                    self.frame_id, seq_num, first
                );
                self.first_bound = Some(seq_num);
                rebuild = true;
            }
        }
        if let Some(last) = self.final_bound {
            if seq::before(last, seq_num) {
                warn!(
                    "Frame {} packet {} follows final bound {}, widening",
                    self.frame_id, seq_num, last
                );
                self.final_bound = Some(seq_num);
                outcome.final_changed = true;
                rebuild = true;
            }
        }

        if rebuild {
            self.rebuild_range();
        } else {
            self.place_in_range(packet);
        }

        outcome
    }

    /// Set the first bound from the predecessor's final sequence.
    ///
    /// If a packet earlier than the hint was already seen, the observed
    /// minimum wins.
    pub fn set_first(&mut self, hint: RtpSequenceNumber) {
        if self.disposed {
            return;
        }
        let first = if seq::before(self.min_seq, hint) {
            debug!(
                "Frame {} first hint {} is after observed minimum {}",
                self.frame_id, hint, self.min_seq
            );
            self.min_seq
        } else {
            hint
        };

        if self.first_bound != Some(first) {
            self.first_bound = Some(first);
            self.rebuild_range();
        }
    }

    /// Record the lowest sequence observed in the successor frame.
    ///
    /// Under successor inference this also fixes the final bound.
    pub fn set_next_frame_min(&mut self, next_min: RtpSequenceNumber) -> bool {
        if self.disposed {
            return false;
        }
        self.next_frame_min = Some(next_min);

        if !self.params.strategy.infers_from_successor() {
            return false;
        }

        let mut last = next_min.wrapping_sub(1);
        if seq::before(last, self.max_seq) {
            warn!(
                "Frame {} successor minimum {} overlaps observed maximum {}",
                self.frame_id, next_min, self.max_seq
            );
            last = self.max_seq;
        }

        if self.final_bound == Some(last) {
            return false;
        }
        self.final_bound = Some(last);
        self.rebuild_range();
        true
    }

    /// Missing sequences that should be requested now.
    ///
    /// Nothing is reported while the frame is assembled or until twice the
    /// estimated latency has passed since the last fresh arrival. Requests
    /// older than `budget_ms` are abandoned.
    pub fn check_lost_packets(
        &mut self,
        now_ms: i64,
        latency_ms: i64,
        budget_ms: i64,
        backoff_ms: i64,
    ) -> Vec<RtpSequenceNumber> {
        if self.disposed || self.is_assembled() {
            return Vec::new();
        }
        if now_ms < self.last_arrival_ms + latency_ms * 2 {
            return Vec::new();
        }

        let expired: Vec<RtpSequenceNumber> = self
            .pending
            .iter()
            .filter(|(_, p)| p.is_expired(now_ms, budget_ms))
            .map(|(s, _)| *s)
            .collect();
        for s in expired {
            if let Some(p) = self.pending.remove(&s) {
                debug!(
                    "Frame {} giving up on packet {} after {} request(s)",
                    self.frame_id, s, p.send_count
                );
            }
            self.abandoned.insert(s);
        }

        let (lo, len) = self.scan_span();
        let mut lost = Vec::new();
        for offset in 0..len {
            let s = lo.wrapping_add(offset as u16);
            if self.packets.contains_key(&s) || self.abandoned.contains(&s) {
                continue;
            }
            match self.pending.get_mut(&s) {
                Some(request) => {
                    if request.is_due(now_ms, backoff_ms) {
                        request.resend(now_ms);
                        debug!(
                            "Frame {} re-requesting packet {}, request {}",
                            self.frame_id, s, request.send_count
                        );
                        lost.push(s);
                    }
                }
                None => {
                    self.pending.insert(s, PendingRetransmission::new(now_ms));
                    lost.push(s);
                }
            }
        }
        lost
    }

    /// Packets to forward, in sequence order.
    ///
    /// The full range when assembled, otherwise every received packet.
    pub fn packets_to_send(&self) -> Vec<RtpPacket> {
        if let (true, Some(range)) = (self.is_assembled(), &self.range) {
            return range.iter().flatten().cloned().collect();
        }

        let anchor = self.first_bound.unwrap_or(self.min_seq);
        let mut seqs: Vec<RtpSequenceNumber> = self.packets.keys().copied().collect();
        seqs.sort_unstable_by_key(|s| s.wrapping_sub(anchor));
        seqs.iter().filter_map(|s| self.packets.get(s).cloned()).collect()
    }

    /// Whether every sequence in `first..=final` is present
    pub fn is_assembled(&self) -> bool {
        matches!(&self.range, Some(range) if self.filled == range.len())
    }

    /// Release all packets and bookkeeping. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.packets.clear();
        self.pending.clear();
        self.abandoned.clear();
        self.range = None;
        self.filled = 0;
        self.disposed = true;
        trace!("Frame {} disposed", self.frame_id);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn frame_id(&self) -> i64 {
        self.frame_id
    }

    /// Extended RTP timestamp of the frame
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn first_arrival_ms(&self) -> i64 {
        self.first_arrival_ms
    }

    pub fn min_seq(&self) -> RtpSequenceNumber {
        self.min_seq
    }

    pub fn max_seq(&self) -> RtpSequenceNumber {
        self.max_seq
    }

    pub fn first_bound(&self) -> Option<RtpSequenceNumber> {
        self.first_bound
    }

    pub fn final_bound(&self) -> Option<RtpSequenceNumber> {
        self.final_bound
    }

    pub fn next_frame_min(&self) -> Option<RtpSequenceNumber> {
        self.next_frame_min
    }

    /// Number of distinct packets received
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Number of sequences with an outstanding request
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Start and length of the sequences to scan for losses
    fn scan_span(&self) -> (RtpSequenceNumber, usize) {
        let lo = self.first_bound.unwrap_or(self.min_seq);
        let hi = self
            .final_bound
            .or_else(|| self.next_frame_min.map(|m| m.wrapping_sub(1)))
            .unwrap_or_else(|| self.max_seq.wrapping_add(self.params.best_effort_overshoot));

        match seq::span_len(lo, hi) {
            Some(len) if len <= MAX_FRAME_SPAN => (lo, len),
            _ => {
                debug!(
                    "Frame {} span {}..={} unusable, scanning observed packets",
                    self.frame_id, lo, hi
                );
                let hi = self.max_seq.wrapping_add(self.params.best_effort_overshoot);
                let len = seq::span_len(self.min_seq, hi).unwrap_or(1).min(MAX_FRAME_SPAN);
                (self.min_seq, len)
            }
        }
    }

    fn place_in_range(&mut self, packet: RtpPacket) {
        let (Some(first), Some(range)) = (self.first_bound, self.range.as_mut()) else {
            return;
        };
        let index = seq::distance(packet.sequence(), first);
        if index < 0 {
            return;
        }
        if let Some(slot) = range.get_mut(index as usize) {
            if slot.is_none() {
                self.filled += 1;
            }
            *slot = Some(packet);
        }
    }

    /// Recompute the range slots from scratch after a bound change
    fn rebuild_range(&mut self) {
        self.range = None;
        self.filled = 0;

        let (Some(first), Some(last)) = (self.first_bound, self.final_bound) else {
            return;
        };

        let len = match seq::span_len(first, last) {
            Some(len) if len <= MAX_FRAME_SPAN => len,
            _ => {
                warn!(
                    "Frame {} has an invalid span {}..={}, falling back to best effort",
                    self.frame_id, first, last
                );
                return;
            }
        };

        let mut range: Vec<Option<RtpPacket>> = vec![None; len];
        let mut filled = 0;
        for (s, packet) in &self.packets {
            let index = seq::distance(*s, first);
            if index >= 0 && (index as usize) < len {
                range[index as usize] = Some(packet.clone());
                filled += 1;
            }
        }

        trace!(
            "Frame {} range {}..={} rebuilt with {}/{} packets",
            self.frame_id, first, last, filled, len
        );
        self.range = Some(range);
        self.filled = filled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn packet(seq_num: u16, marker: bool) -> RtpPacket {
        let mut p = RtpPacket::new_with_payload(
            96,
            seq_num,
            3600,
            0x1234,
            Bytes::from(seq_num.to_be_bytes().to_vec()),
        );
        p.header.marker = marker;
        p
    }

    fn frame_from(first: RtpPacket, hint: Option<u16>, strategy: BoundaryStrategy) -> FrameAssembler {
        let params = FrameParams { strategy, ..Default::default() };
        FrameAssembler::new(1, first, 3600, 0, hint, params)
    }

    fn sequences(packets: &[RtpPacket]) -> Vec<u16> {
        packets.iter().map(|p| p.sequence()).collect()
    }

    #[test]
    fn test_in_order_assembly() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(106, false), Some(106), BoundaryStrategy::EndMarker);
        for s in 107..110 {
            frame.add_packet(packet(s, false), 0, &mut rtt);
            assert!(!frame.is_assembled());
        }
        let outcome = frame.add_packet(packet(110, true), 0, &mut rtt);
        assert!(outcome.final_changed);
        assert!(frame.is_assembled());
        assert_eq!(sequences(&frame.packets_to_send()), vec![106, 107, 108, 109, 110]);
    }

    #[test]
    fn test_arbitrary_order_assembly() {
        let mut rng = SmallRng::seed_from_u64(7);
        let all: Vec<u16> = (65530..=65535).chain(0..=5).collect();

        for _ in 0..50 {
            let mut order = all.clone();
            order.shuffle(&mut rng);

            let mut rtt = RetransmissionRtt::new();
            let first = order[0];
            let mut frame = frame_from(packet(first, first == 5), Some(65530), BoundaryStrategy::EndMarker);
            for &s in &order[1..] {
                assert!(!frame.is_assembled());
                frame.add_packet(packet(s, s == 5), 0, &mut rtt);
            }

            assert!(frame.is_assembled());
            assert_eq!(sequences(&frame.packets_to_send()), all);
        }
    }

    #[test]
    fn test_best_effort_order_over_whole_domain() {
        let mut rtt = RetransmissionRtt::new();
        let seqs: Vec<u16> = (0..64u16).map(|i| i * 1024 + (i * 37) % 1000).collect();
        let mut frame = frame_from(packet(seqs[0], false), None, BoundaryStrategy::EndMarker);
        for &s in &seqs[1..] {
            frame.add_packet(packet(s, false), 0, &mut rtt);
        }

        let sent = sequences(&frame.packets_to_send());
        assert_eq!(sent.len(), seqs.len());
        assert_eq!(sent[0], frame.min_seq());
        let offsets: Vec<u16> = sent.iter().map(|s| s.wrapping_sub(frame.min_seq())).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_single_loss_and_backoff() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(106, false), Some(106), BoundaryStrategy::EndMarker);
        frame.add_packet(packet(107, false), 5, &mut rtt);
        frame.add_packet(packet(109, false), 10, &mut rtt);
        frame.add_packet(packet(110, true), 15, &mut rtt);

        // Guard: 2 x 10 ms after the last arrival at 15
        assert!(frame.check_lost_packets(30, 10, 400, 100).is_empty());
        assert_eq!(frame.check_lost_packets(35, 10, 400, 100), vec![108]);
        assert_eq!(frame.pending_count(), 1);

        assert!(frame.check_lost_packets(100, 10, 400, 100).is_empty());
        assert!(frame.check_lost_packets(135, 10, 400, 100).is_empty());
        assert_eq!(frame.check_lost_packets(136, 10, 400, 100), vec![108]);

        let outcome = frame.add_packet(packet(108, false), 186, &mut rtt);
        assert!(outcome.retransmitted);
        assert_eq!(rtt.mean_ms(), Some(50));
        assert!(frame.is_assembled());
        assert!(frame.check_lost_packets(1000, 10, 400, 100).is_empty());
    }

    #[test]
    fn test_retransmission_does_not_reset_guard() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(10, false), Some(10), BoundaryStrategy::EndMarker);
        frame.add_packet(packet(14, true), 0, &mut rtt);

        let lost = frame.check_lost_packets(50, 10, 1000, 100);
        assert_eq!(lost, vec![11, 12, 13]);

        frame.add_packet(packet(11, false), 60, &mut rtt);
        // 12 and 13 are still due on their own schedule
        assert_eq!(frame.check_lost_packets(151, 10, 1000, 100), vec![12, 13]);
    }

    #[test]
    fn test_requests_expire_after_budget() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(10, false), Some(10), BoundaryStrategy::EndMarker);
        frame.add_packet(packet(12, true), 0, &mut rtt);

        assert_eq!(frame.check_lost_packets(10, 0, 400, 100), vec![11]);
        assert_eq!(frame.check_lost_packets(200, 0, 400, 100), vec![11]);
        assert!(frame.check_lost_packets(411, 0, 400, 100).is_empty());
        assert_eq!(frame.pending_count(), 0);
        assert!(!frame.is_assembled());
        assert_eq!(sequences(&frame.packets_to_send()), vec![10, 12]);
    }

    #[test]
    fn test_best_effort_overshoot() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(200, false), None, BoundaryStrategy::EndMarker);
        frame.add_packet(packet(202, false), 0, &mut rtt);

        assert_eq!(frame.check_lost_packets(0, 0, 400, 100), vec![201, 203, 204, 205]);
    }

    #[test]
    fn test_best_effort_uses_next_frame_min() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(200, false), None, BoundaryStrategy::EndMarker);
        frame.add_packet(packet(202, false), 0, &mut rtt);
        assert!(!frame.set_next_frame_min(204));

        assert_eq!(frame.check_lost_packets(0, 0, 400, 100), vec![201, 203]);
    }

    #[test]
    fn test_successor_inference() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(50, true), Some(50), BoundaryStrategy::SuccessorInference);
        assert_eq!(frame.final_bound(), None);

        frame.add_packet(packet(51, false), 0, &mut rtt);
        assert!(frame.set_next_frame_min(53));
        assert_eq!(frame.final_bound(), Some(52));
        assert!(!frame.is_assembled());

        frame.add_packet(packet(52, false), 0, &mut rtt);
        assert!(frame.is_assembled());

        // A lower successor minimum than our own maximum is contradictory
        assert!(!frame.set_next_frame_min(52));
        assert_eq!(frame.final_bound(), Some(52));
    }

    #[test]
    fn test_first_hint_after_observed_min() {
        let mut frame = frame_from(packet(20, false), None, BoundaryStrategy::EndMarker);
        frame.set_first(22);
        assert_eq!(frame.first_bound(), Some(20));

        frame.set_first(18);
        assert_eq!(frame.first_bound(), Some(18));
    }

    #[test]
    fn test_packet_outside_bounds_widens() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(30, false), Some(30), BoundaryStrategy::EndMarker);
        frame.add_packet(packet(31, true), 0, &mut rtt);
        assert!(frame.is_assembled());

        let outcome = frame.add_packet(packet(28, false), 0, &mut rtt);
        assert!(outcome.min_lowered);
        assert_eq!(frame.first_bound(), Some(28));
        assert!(!frame.is_assembled());

        frame.add_packet(packet(29, false), 0, &mut rtt);
        assert!(frame.is_assembled());
        assert_eq!(sequences(&frame.packets_to_send()), vec![28, 29, 30, 31]);
    }

    #[test]
    fn test_duplicate_replaces() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(1, false), Some(1), BoundaryStrategy::EndMarker);
        frame.add_packet(packet(2, true), 0, &mut rtt);

        let mut replacement = packet(2, true);
        replacement.payload = Bytes::from_static(b"again");
        let outcome = frame.add_packet(replacement, 0, &mut rtt);
        assert!(outcome.duplicate);
        assert!(frame.is_assembled());
        assert_eq!(frame.packet_count(), 2);
        assert_eq!(frame.packets_to_send()[1].payload, Bytes::from_static(b"again"));
    }

    #[test]
    fn test_dispose_idempotent() {
        let mut rtt = RetransmissionRtt::new();
        let mut frame = frame_from(packet(1, true), Some(1), BoundaryStrategy::EndMarker);
        frame.dispose();
        frame.dispose();
        assert!(frame.is_disposed());
        assert!(frame.packets_to_send().is_empty());
        assert_eq!(frame.add_packet(packet(2, false), 0, &mut rtt), PacketOutcome::default());
        assert!(frame.check_lost_packets(1000, 0, 400, 100).is_empty());
    }
}

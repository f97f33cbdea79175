//! Per-SSRC reordering and gap detection (§4.1).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use codec::rtp::{rtp_ts_diff, seq_diff, GapReason, Packet};

/// What the resequencer hands to the segmenter: either an in-order packet,
/// or a confirmed gap with no sample data (the segmenter fills it with
/// zeros and turns it into a `GapRecord` once it knows where in the
/// segment the gap falls).
#[derive(Debug, Clone)]
pub enum ResequencerEvent {
    Packet(Packet),
    Gap {
        samples_lost: u64,
        packets_lost: u32,
        rtp_ts_before: u32,
        rtp_ts_after: u32,
        reason: GapReason,
    },
}

pub struct ResequencerConfig {
    pub wait_budget: Duration,
    pub max_buffered: usize,
    pub samples_per_packet: u32,
}

impl ResequencerConfig {
    pub fn from_channel(meta: &codec::channel::ChannelMeta) -> Self {
        Self {
            wait_budget: Duration::from_millis(150),
            max_buffered: 64,
            samples_per_packet: meta.samples_per_packet(),
        }
    }
}

/// Maintains a small reorder window keyed by sequence number and emits
/// packets in order, synthesizing gaps for packets that never arrive within
/// the wait budget.
pub struct Resequencer {
    config: ResequencerConfig,
    next_seq: Option<u16>,
    expected_rtp_ts: Option<u32>,
    buffer: HashMap<u16, (Instant, Packet)>,
    pub late_drops: u64,
    pub duplicates: u64,
}

impl Resequencer {
    pub fn new(config: ResequencerConfig) -> Self {
        Self {
            config,
            next_seq: None,
            expected_rtp_ts: None,
            buffer: HashMap::new(),
            late_drops: 0,
            duplicates: 0,
        }
    }

    /// Feeds one arrived packet in and drains as many in-order events as
    /// are now ready. Call repeatedly as packets arrive; the wait-budget
    /// and buffer-capacity checks only fire on this call, so a stalled
    /// source (no further arrivals) will not itself surface a gap here
    /// until the next packet arrives. The ingest loop's own max-gap
    /// watchdog notices and logs the stall in the meantime; the gap itself
    /// is only resolved once a packet resumes and reveals its length.
    pub fn push(&mut self, packet: Packet) -> Vec<ResequencerEvent> {
        let mut events = Vec::new();

        let next_seq = *self.next_seq.get_or_insert(packet.seq);
        if self.expected_rtp_ts.is_none() {
            self.expected_rtp_ts = Some(packet.rtp_ts);
        }

        match seq_diff(packet.seq, next_seq) {
            d if d < 0 => {
                // Either a duplicate of something already delivered, or a
                // very late packet arriving after its slot was already
                // declared lost.
                if self.buffer.remove(&packet.seq).is_some() {
                    self.duplicates += 1;
                } else {
                    self.late_drops += 1;
                }
            }
            0 => {
                self.buffer.insert(packet.seq, (Instant::now(), packet));
            }
            _ => {
                if self.buffer.contains_key(&packet.seq) {
                    self.duplicates += 1;
                } else {
                    self.buffer.insert(packet.seq, (Instant::now(), packet));
                }
            }
        }

        self.drain(&mut events);
        events
    }

    fn drain(&mut self, events: &mut Vec<ResequencerEvent>) {
        loop {
            let next_seq = match self.next_seq {
                Some(s) => s,
                None => return,
            };

            if let Some((_, packet)) = self.buffer.remove(&next_seq) {
                self.emit_packet(packet, events);
                self.next_seq = Some(next_seq.wrapping_add(1));
                continue;
            }

            if self.should_force_gap() {
                self.force_one_gap(events);
                continue;
            }

            return;
        }
    }

    fn should_force_gap(&self) -> bool {
        if self.buffer.len() > self.config.max_buffered {
            return true;
        }
        self.buffer
            .values()
            .any(|(arrived, _)| arrived.elapsed() >= self.config.wait_budget)
    }

    fn force_one_gap(&mut self, events: &mut Vec<ResequencerEvent>) {
        let rtp_ts_before = self.expected_rtp_ts.unwrap_or(0);
        let samples_lost = self.config.samples_per_packet as u64;
        let rtp_ts_after = rtp_ts_before.wrapping_add(self.config.samples_per_packet);

        events.push(ResequencerEvent::Gap {
            samples_lost,
            packets_lost: 1,
            rtp_ts_before,
            rtp_ts_after,
            reason: GapReason::NetworkLoss,
        });

        self.expected_rtp_ts = Some(rtp_ts_after);
        self.next_seq = self.next_seq.map(|s| s.wrapping_add(1));
    }

    fn emit_packet(&mut self, packet: Packet, events: &mut Vec<ResequencerEvent>) {
        if let Some(expected) = self.expected_rtp_ts {
            let delta = rtp_ts_diff(packet.rtp_ts, expected);
            let tolerance = self.config.samples_per_packet as i32;
            if delta.unsigned_abs() as i64 > tolerance as i64 {
                events.push(ResequencerEvent::Gap {
                    samples_lost: delta.unsigned_abs() as u64,
                    packets_lost: 0,
                    rtp_ts_before: expected,
                    rtp_ts_after: packet.rtp_ts,
                    reason: GapReason::SourceUnavailable,
                });
            }
        }

        self.expected_rtp_ts = Some(packet.rtp_ts.wrapping_add(packet.samples.len() as u32));
        events.push(ResequencerEvent::Packet(packet));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::rtp::Complex;

    fn packet(seq: u16, rtp_ts: u32, n: usize) -> Packet {
        Packet {
            seq,
            rtp_ts,
            marker: false,
            ssrc: 1,
            samples: vec![Complex::ZERO; n],
            wall_clock_hint: None,
        }
    }

    fn resequencer() -> Resequencer {
        Resequencer::new(ResequencerConfig {
            wait_budget: Duration::from_millis(20),
            max_buffered: 8,
            samples_per_packet: 160,
        })
    }

    #[test]
    fn in_order_packets_pass_through_immediately() {
        let mut r = resequencer();
        let events = r.push(packet(0, 0, 160));
        assert!(matches!(events.as_slice(), [ResequencerEvent::Packet(_)]));
        let events = r.push(packet(1, 160, 160));
        assert!(matches!(events.as_slice(), [ResequencerEvent::Packet(_)]));
    }

    #[test]
    fn reordered_packets_are_reassembled_in_order() {
        let mut r = resequencer();
        let events = r.push(packet(1, 160, 160));
        assert!(events.is_empty());

        let events = r.push(packet(0, 0, 160));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ResequencerEvent::Packet(ref p) if p.seq == 0));
        assert!(matches!(events[1], ResequencerEvent::Packet(ref p) if p.seq == 1));
    }

    #[test]
    fn duplicate_packets_are_silently_dropped() {
        let mut r = resequencer();
        r.push(packet(0, 0, 160));
        let events = r.push(packet(0, 0, 160));
        assert!(events.is_empty());
        assert_eq!(r.duplicates, 1);
    }

    #[test]
    fn a_missing_packet_past_the_wait_budget_becomes_a_gap() {
        let mut r = resequencer();
        r.push(packet(0, 0, 160));
        std::thread::sleep(Duration::from_millis(30));
        let events = r.push(packet(2, 320, 160));

        assert!(matches!(events[0], ResequencerEvent::Gap { packets_lost: 1, .. }));
        assert!(matches!(events[1], ResequencerEvent::Packet(ref p) if p.seq == 2));
    }
}

//! Minute-aligned accumulation and gap filling (§4.2). Samples and gaps
//! from the resequencer are folded into the in-flight [`Segment`], splitting
//! at minute boundaries purely by RTP tick count, never by wall clock.

use codec::channel::ChannelMeta;
use codec::rtp::{rtp_ts_add, Complex, GapReason};
use codec::segment::{GapRecord, Segment};

use super::resequencer::ResequencerEvent;

/// Accumulates one channel's in-flight segment and finalizes completed
/// ones. `first_sample_utc` is left `None` here; the pipeline orchestrator
/// fills it in from the channel's `TimeSnapManager` at the moment a segment
/// finalizes, since only it knows the current TimeSnap.
pub struct Segmenter {
    channel: ChannelMeta,
    first_sample_rtp: Option<u32>,
    samples: Vec<Complex>,
    gaps: Vec<GapRecord>,
}

impl Segmenter {
    pub fn new(channel: ChannelMeta) -> Self {
        Self { channel, first_sample_rtp: None, samples: Vec::new(), gaps: Vec::new() }
    }

    fn required(&self) -> usize {
        self.channel.ticks_per_minute() as usize
    }

    fn start_if_needed(&mut self, rtp_ts: u32) {
        if self.first_sample_rtp.is_none() {
            self.first_sample_rtp = Some(rtp_ts);
        }
    }

    /// Finalizes the current buffer into a `Segment` (without `first_sample_utc`,
    /// filled in by the caller) and resets the builder for the next minute,
    /// whose first RTP tick is exactly where this one ended.
    fn finalize(&mut self) -> Segment {
        let next_rtp = rtp_ts_add(self.first_sample_rtp.expect("segment was started"), self.required() as i64);

        let segment = Segment {
            channel: self.channel.clone(),
            first_sample_rtp: self.first_sample_rtp.take().expect("segment was started"),
            first_sample_utc: None,
            samples: std::mem::take(&mut self.samples),
            gaps: std::mem::take(&mut self.gaps),
        };
        segment.assert_valid();

        self.first_sample_rtp = Some(next_rtp);
        segment
    }

    /// Feeds one resequencer event in, returning zero or more finalized
    /// segments (more than one only for a gap large enough to span several
    /// minute boundaries, e.g. the stream-loss-across-boundary scenario).
    pub fn push(&mut self, event: ResequencerEvent) -> Vec<Segment> {
        match event {
            ResequencerEvent::Packet(packet) => {
                self.start_if_needed(packet.rtp_ts);
                self.absorb_samples(&packet.samples)
            }
            ResequencerEvent::Gap { samples_lost, packets_lost, rtp_ts_before, rtp_ts_after, reason } => {
                self.start_if_needed(rtp_ts_before);
                self.absorb_gap(samples_lost, packets_lost, rtp_ts_before, rtp_ts_after, reason)
            }
        }
    }

    fn absorb_samples(&mut self, samples: &[Complex]) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut remaining = samples;

        while !remaining.is_empty() {
            let space = self.required() - self.samples.len();
            let take = space.min(remaining.len());
            self.samples.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.samples.len() == self.required() {
                out.push(self.finalize());
            }
        }

        out
    }

    fn absorb_gap(
        &mut self,
        mut samples_lost: u64,
        packets_lost: u32,
        mut rtp_ts_before: u32,
        rtp_ts_after: u32,
        reason: GapReason,
    ) -> Vec<Segment> {
        let mut out = Vec::new();

        while samples_lost > 0 {
            let space = (self.required() - self.samples.len()) as u64;
            let take = space.min(samples_lost);
            let sample_index = self.samples.len() as u64;

            self.samples.extend(std::iter::repeat(Complex::ZERO).take(take as usize));
            let take_end_rtp = rtp_ts_add(rtp_ts_before, take as i64);
            self.gaps.push(GapRecord {
                sample_index,
                samples_filled: take,
                packets_lost,
                rtp_ts_before,
                rtp_ts_after: take_end_rtp,
                reason,
            });

            rtp_ts_before = take_end_rtp;
            samples_lost -= take;

            if self.samples.len() == self.required() {
                out.push(self.finalize());
            }
        }

        let _ = rtp_ts_after;
        out
    }
}

//! Quantified invariants from §8, checked with proptest where the
//! property is naturally a "for all inputs" statement. The segment length
//! and gap-accounting invariants are exercised as deterministic unit tests
//! closer to the code they cover (`pipeline::segmenter`, `archive`); linear
//! RTP-to-UTC projection lives in `tsig_recorder_codec::timesnap`; tone
//! detection, clock offset convergence and discrimination idempotence live
//! in their respective analytics modules. This file covers the two
//! properties whose "for all" quantifies over packet/gap layouts best
//! explored with proptest: adjacent-segment spacing and gap accounting.

use codec::channel::{ChannelMeta, ChannelName, Station};
use codec::rtp::{rtp_ts_diff, Complex};

use proptest::prelude::*;

use tsig_recorder::pipeline::resequencer::ResequencerEvent;
use tsig_recorder::pipeline::segmenter::Segmenter;

const SAMPLE_RATE: u32 = 8_000;

fn channel() -> ChannelMeta {
    ChannelMeta {
        name: ChannelName::new("WWV 10 MHz"),
        center_frequency_hz: 10_000_000.0,
        sample_rate: SAMPLE_RATE,
        expected_stations: vec![Station::Wwv],
        blocktime_ms: 20,
        max_gap_seconds: 60,
    }
}

fn packet_event(rtp_ts: u32, n: usize) -> ResequencerEvent {
    ResequencerEvent::Packet(codec::rtp::Packet {
        seq: 0,
        rtp_ts,
        marker: false,
        ssrc: 1,
        samples: vec![Complex::ZERO; n],
        wall_clock_hint: None,
    })
}

proptest! {
    /// Adjacent published segments with no declared stream loss between
    /// them are exactly one minute's worth of RTP ticks apart, under signed
    /// 32-bit wraparound arithmetic, regardless of how the minute's worth of
    /// samples was split across packets or where the first segment started.
    #[test]
    fn p2_adjacent_segments_are_one_minute_apart(
        first_rtp in any::<u32>(),
        split_points in prop::collection::vec(1usize..=500, 1..20),
    ) {
        let required = channel().ticks_per_minute() as usize;
        let mut segmenter = Segmenter::new(channel());

        let mut produced = Vec::new();
        let mut rtp_cursor = first_rtp;
        let mut remaining = required * 2;

        for chunk in split_points.iter().cycle() {
            if remaining == 0 {
                break;
            }
            let take = (*chunk).min(remaining);
            produced.extend(segmenter.push(packet_event(rtp_cursor, take)));
            rtp_cursor = codec::rtp::rtp_ts_add(rtp_cursor, take as i64);
            remaining -= take;
        }

        prop_assert!(produced.len() >= 2);
        for pair in produced.windows(2) {
            let delta = rtp_ts_diff(pair[1].first_sample_rtp, pair[0].first_sample_rtp);
            prop_assert_eq!(delta, required as i32);
        }
    }

    /// For a synthetic stream with injected loss of L samples spread
    /// over K gaps, the segmenter emits GapRecords across its published
    /// segments summing to exactly L filled samples, and every published
    /// segment still has exactly `sample_rate * 60` samples.
    #[test]
    fn p5_injected_loss_is_fully_accounted_for(
        gap_sizes in prop::collection::vec(1u64..=3_000, 1..8),
    ) {
        let required = channel().ticks_per_minute() as usize;
        let mut segmenter = Segmenter::new(channel());

        let mut rtp_cursor = 0u32;
        let mut produced = Vec::new();
        let total_loss: u64 = gap_sizes.iter().sum();

        for size in &gap_sizes {
            let rtp_after = codec::rtp::rtp_ts_add(rtp_cursor, *size as i64);
            produced.extend(segmenter.push(ResequencerEvent::Gap {
                samples_lost: *size,
                packets_lost: 1,
                rtp_ts_before: rtp_cursor,
                rtp_ts_after: rtp_after,
                reason: codec::rtp::GapReason::NetworkLoss,
            }));
            rtp_cursor = rtp_after;
        }

        // Pad the in-flight segment to a clean boundary so the final
        // partial segment finalizes too, keeping the accounting exact.
        let required_u64 = required as u64;
        let remainder = total_loss % required_u64;
        if remainder != 0 {
            let pad = required_u64 - remainder;
            produced.extend(segmenter.push(packet_event(rtp_cursor, pad as usize)));
        }

        for segment in &produced {
            prop_assert_eq!(segment.samples.len(), required);
        }

        let total_filled: u64 = produced.iter().map(|s| s.filled_sample_count()).sum();
        prop_assert_eq!(total_filled, total_loss);
    }
}

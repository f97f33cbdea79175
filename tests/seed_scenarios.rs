//! Concrete seed-test scenarios (§8). Scenario 2 (out-of-order burst) is
//! covered by `pipeline::resequencer`'s own unit tests and scenario 6
//! (shared-frequency minute 2) by `analytics::discriminator`'s; both live
//! closer to the code they exercise. The remaining scenarios assemble the
//! Resequencer -> Segmenter -> TimeSnapManager -> tone detector ->
//! discriminator -> clock offset chain directly, without a socket, since
//! only the packet source touches the network.

use chrono::Utc;

use analytics::clock_offset::ClockOffsetEstimator;
use analytics::timesnap_manager::TimeSnapManager;
use analytics::tone_detector::{detect_tones, ToneDetectorConfig};
use codec::channel::{ChannelMeta, ChannelName, Station};
use codec::rtp::{rtp_ts_add, Complex, GapReason, Packet};
use codec::timesnap::TimeSnapSource;
use dsp::correlate::build_tone_template;

use tsig_recorder::pipeline::resequencer::{Resequencer, ResequencerConfig, ResequencerEvent};
use tsig_recorder::pipeline::segmenter::Segmenter;

const SAMPLE_RATE: u32 = 20_000;

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

fn samples_with_tone(total: usize, onset: usize) -> Vec<Complex> {
    let tmpl = build_tone_template(Station::Wwv.tone_freq_hz(), Station::Wwv.tone_duration_ms(), SAMPLE_RATE);
    let mut out = vec![Complex::ZERO; total];
    for (i, s) in tmpl.iter().enumerate() {
        if onset + i < out.len() {
            out[onset + i] = *s;
        }
    }
    out
}

/// Feeds one minute's samples through the resequencer and segmenter as a
/// single in-order packet, returning the finalized segment.
fn segment_one_clean_minute(samples: Vec<Complex>, first_rtp: u32) -> codec::segment::Segment {
    let mut resequencer = Resequencer::new(ResequencerConfig::from_channel(&channel()));
    let mut segmenter = Segmenter::new(channel());

    let packet = Packet { seq: 0, rtp_ts: first_rtp, marker: false, ssrc: 1, samples, wall_clock_hint: None };

    let mut segments = Vec::new();
    for event in resequencer.push(packet) {
        segments.extend(segmenter.push(event));
    }
    assert_eq!(segments.len(), 1, "one full minute of samples must finalize exactly one segment");
    segments.into_iter().next().unwrap()
}

/// Scenario 1: clean minute, one clean WWV tone at sample 0 +/- jitter.
#[test]
fn scenario_1_clean_minute() {
    let required = channel().ticks_per_minute() as usize;
    let samples = samples_with_tone(required, 3);

    let segment = segment_one_clean_minute(samples, 0);
    assert_eq!(segment.samples.len(), required);
    assert!(segment.gaps.is_empty());

    let detections = detect_tones(
        &segment.samples,
        SAMPLE_RATE,
        segment.first_sample_rtp,
        &segment.channel.expected_stations,
        &ToneDetectorConfig::default(),
    );
    assert_eq!(detections.len(), 1);
    let detection = &detections[0];
    assert_eq!(detection.station, Station::Wwv);

    let minute_utc = Utc::now();
    let mut timesnap = TimeSnapManager::new(SAMPLE_RATE, minute_utc, 0);
    timesnap.consider_detection(detection, minute_utc);
    timesnap.apply_pending_at_boundary(minute_utc);
    assert_eq!(timesnap.current().source, TimeSnapSource::WwvTone);

    // Receiver colocated with the transmitter zeroes tau_geo, isolating the
    // measured clock offset from a coordinate-dependent propagation delay.
    let receiver = analytics::geo::station_location(Station::Wwv);
    let mut clock_offset = ClockOffsetEstimator::new(receiver);
    let onset_utc = timesnap.current().utc_at(detection.rtp_onset, SAMPLE_RATE);
    let t_arrival_ms = (onset_utc - minute_utc).num_microseconds().unwrap_or(0) as f64 / 1000.0;
    let measurement = clock_offset.measurement_from_tone(detection, minute_utc, t_arrival_ms);
    let offset = clock_offset.update(&measurement);
    assert!(offset.d_clock_ms.abs() < 5.0, "d_clock_ms={}", offset.d_clock_ms);
}

/// Scenario 3: one second of loss at second 30, recorded as a single
/// GapRecord, with tone detection at the start of the minute unaffected.
/// Feeds the segmenter directly (bypassing the resequencer) since this
/// scenario is about the segmenter/gap-filler's own accounting, not about
/// how the resequencer happened to notice the loss.
#[test]
fn scenario_3_one_second_loss_mid_minute() {
    let required = channel().ticks_per_minute() as usize;
    let loss_samples = SAMPLE_RATE as usize; // 1 second
    let loss_start = 30 * SAMPLE_RATE as usize;

    let mut segmenter = Segmenter::new(channel());

    let head = samples_with_tone(loss_start, 3);
    let tail = vec![Complex::ZERO; required - loss_start - loss_samples];

    let mut segments = Vec::new();
    segments.extend(segmenter.push(ResequencerEvent::Packet(Packet {
        seq: 0,
        rtp_ts: 0,
        marker: false,
        ssrc: 1,
        samples: head,
        wall_clock_hint: None,
    })));

    segments.extend(segmenter.push(ResequencerEvent::Gap {
        samples_lost: loss_samples as u64,
        packets_lost: 1,
        rtp_ts_before: loss_start as u32,
        rtp_ts_after: rtp_ts_add(loss_start as u32, loss_samples as i64),
        reason: GapReason::NetworkLoss,
    }));

    segments.extend(segmenter.push(ResequencerEvent::Packet(Packet {
        seq: 1,
        rtp_ts: (loss_start + loss_samples) as u32,
        marker: false,
        ssrc: 1,
        samples: tail,
        wall_clock_hint: None,
    })));

    assert_eq!(segments.len(), 1);
    let segment = &segments[0];
    assert_eq!(segment.samples.len(), required);
    assert_eq!(segment.gaps.len(), 1);
    assert_eq!(segment.gaps[0].sample_index, loss_start as u64);
    assert_eq!(segment.gaps[0].samples_filled, loss_samples as u64);
    assert_eq!(segment.gaps[0].reason, GapReason::NetworkLoss);

    let detections = detect_tones(
        &segment.samples,
        SAMPLE_RATE,
        segment.first_sample_rtp,
        &segment.channel.expected_stations,
        &ToneDetectorConfig::default(),
    );
    assert_eq!(detections.len(), 1, "the minute-0 tone is well before the mid-minute loss");
}

/// Scenario 4: no packets for 90s spans two minute boundaries; both
/// segments are fully zero-filled with a single `source_unavailable` gap,
/// and the TimeSnap ages since nothing applies at either boundary.
#[test]
fn scenario_4_stream_loss_across_minute_boundary() {
    let required = channel().ticks_per_minute() as u64;
    let mut segmenter = Segmenter::new(channel());

    let segments = segmenter.push(ResequencerEvent::Gap {
        samples_lost: required * 2,
        packets_lost: 2,
        rtp_ts_before: 0,
        rtp_ts_after: (required * 2) as u32,
        reason: GapReason::SourceUnavailable,
    });

    assert_eq!(segments.len(), 2);
    for segment in &segments {
        assert_eq!(segment.samples.len(), required as usize);
        assert_eq!(segment.filled_sample_count(), required);
        assert_eq!(segment.non_filled_sample_count(), 0);
        assert!(segment.gaps.iter().all(|g| g.reason == GapReason::SourceUnavailable));
    }

    // A tone-locked anchor established just before the stall degrades
    // through INTERPOLATED and eventually to WALL_CLOCK as it ages with
    // no fresh detection across the two silent minutes (§4.3 failure
    // semantics).
    let established = Utc::now();
    let mut timesnap = TimeSnapManager::new(SAMPLE_RATE, established, 0);
    let tone = codec::tone::ToneDetection {
        station: Station::Wwv,
        tone_freq_hz: Station::Wwv.tone_freq_hz(),
        rtp_onset: 0,
        sub_sample_refinement: 0.0,
        snr_db: 25.0,
        tone_power_db: 20.0,
        timing_error_ms: 0.1,
        confidence: 0.9,
    };
    timesnap.consider_detection(&tone, established);
    timesnap.apply_pending_at_boundary(established);
    assert_eq!(timesnap.current().source, TimeSnapSource::WwvTone);

    timesnap.apply_pending_at_boundary(established + chrono::Duration::minutes(10));
    assert_eq!(timesnap.current().grade(), codec::timesnap::TimeSnapGrade::Interpolated);

    timesnap.apply_pending_at_boundary(established + chrono::Duration::minutes(90));
    assert_eq!(timesnap.current().grade(), codec::timesnap::TimeSnapGrade::WallClock);
}

/// Scenario 5: an RTP wraparound across 2^32 still yields the nominal
/// per-minute tick delta between adjacent segments, with no spurious gap
/// synthesized by the segmenter.
#[test]
fn scenario_5_rtp_wraparound_no_spurious_gap() {
    let required = channel().ticks_per_minute() as u32;
    let first_rtp = u32::MAX - (required / 2);

    let samples = vec![Complex::ZERO; required as usize];
    let segment_a = segment_one_clean_minute(samples.clone(), first_rtp);
    assert!(segment_a.gaps.is_empty());

    let next_rtp = rtp_ts_add(segment_a.first_sample_rtp, required as i64);
    let segment_b = segment_one_clean_minute(samples, next_rtp);
    assert!(segment_b.gaps.is_empty());

    assert_eq!(
        codec::rtp::rtp_ts_diff(segment_b.first_sample_rtp, segment_a.first_sample_rtp),
        required as i32,
        "adjacent segments must be exactly one minute apart under signed wraparound arithmetic"
    );
}

//! WWV/WWVH discrimination: eight independently-weighted voting methods
//! plus cross-validation checks, combined into one per-minute verdict
//! (§4.5).
//!
//! `MethodVote::score` follows the convention fixed in
//! [`codec::discrimination::MethodVote`]: positive favors WWV, negative
//! favors WWVH. Each method below is applicable only on the minutes its
//! underlying signal exists; inapplicable methods contribute no vote rather
//! than a zero-weight placeholder (§4.5 failure semantics).

use chrono::{DateTime, Timelike, Utc};
use codec::channel::{GeoPoint, Station};
use codec::discrimination::{Confidence, Discrimination, Dominant, MethodId, MethodVote};
use codec::rtp::Complex;
use codec::tone::ToneDetection;
use dsp::correlate::{goertzel_power, snr_db};

use crate::geo;

/// WWV performs its voice/self-test interval at :08, WWVH at :44; the
/// opposite station goes quiet to avoid overlap (§4.5 TestSignal method).
const TEST_SIGNAL_MINUTES: [u32; 2] = [8, 44];
/// WWVH sounds a 440 Hz station-ID tone at :01, WWV at :02 (§4.5
/// StationId440Hz method).
const STATION_ID_MINUTES: [u32; 2] = [1, 2];
/// Minutes where the opposite station's tick is suppressed, making timing
/// coherence diagnostic (§4.5 TimingCoherence method).
const TIMING_COHERENCE_MINUTES: [u32; 2] = [8, 44];
/// Minutes where only WWV transmits its 500 Hz ground-truth tone.
const WWV_EXCLUSIVE_MINUTES: [u32; 4] = [1, 16, 17, 19];
/// Minutes where only WWVH transmits its 600 Hz ground-truth tone.
const WWVH_EXCLUSIVE_MINUTES: [u32; 10] = [2, 43, 44, 45, 46, 47, 48, 49, 50, 51];

const SILENCE_RMS_THRESHOLD: f64 = 1e-4;
const STATION_ID_SNR_THRESHOLD_DB: f64 = 6.0;
const GROUND_TRUTH_SNR_THRESHOLD_DB: f64 = 8.0;

/// Everything the discriminator needs to evaluate one minute (§4.5 inputs).
pub struct DiscriminatorInputs<'a> {
    pub segment_samples: &'a [Complex],
    pub sample_rate: u32,
    pub minute_utc: DateTime<Utc>,
    pub receiver_location: GeoPoint,
    pub wwv_tone: Option<&'a ToneDetection>,
    pub wwvh_tone: Option<&'a ToneDetection>,
}

/// Runs all eight methods and the cross-validation checks, and resolves a
/// dominant-station verdict for this minute (§4.5).
pub fn discriminate(inputs: &DiscriminatorInputs) -> Discrimination {
    let minute_of_hour = inputs.minute_utc.minute();

    let votes: Vec<MethodVote> = [
        test_signal_vote(minute_of_hour, inputs.segment_samples, inputs.sample_rate),
        station_id_440_vote(minute_of_hour, inputs.segment_samples, inputs.sample_rate),
        bcd_amplitude_ratio_vote(inputs.segment_samples, inputs.sample_rate, &inputs.receiver_location),
        tone_power_ratio_vote(inputs.wwv_tone, inputs.wwvh_tone),
        tick_coherence_vote(inputs.segment_samples, inputs.sample_rate),
        ground_truth_vote(minute_of_hour, inputs.segment_samples, inputs.sample_rate),
        doppler_stability_vote(inputs.segment_samples, inputs.sample_rate),
        timing_coherence_vote(minute_of_hour, inputs.wwv_tone, inputs.wwvh_tone),
    ]
    .into_iter()
    .flatten()
    .collect();

    let mut cross_checks = Vec::new();
    let (dominant, confidence) = resolve(&votes, &mut cross_checks);

    Discrimination {
        minute_utc: inputs.minute_utc,
        votes,
        dominant,
        confidence,
        cross_checks,
    }
}

fn resolve(votes: &[MethodVote], cross_checks: &mut Vec<String>) -> (Dominant, Confidence) {
    if votes.is_empty() {
        return (Dominant::Unknown, Confidence::Low);
    }

    let total_weight: f64 = votes.iter().map(|v| v.weight.abs()).sum();
    if total_weight < 1e-9 {
        return (Dominant::Unknown, Confidence::Low);
    }

    let signed_sum: f64 = votes.iter().map(|v| v.score * v.weight).sum();
    let normalized = (signed_sum / total_weight).clamp(-1.0, 1.0);
    let magnitude = normalized.abs();

    let dominant = if magnitude < 0.15 {
        Dominant::Balanced
    } else if normalized > 0.0 {
        Dominant::Wwv
    } else {
        Dominant::Wwvh
    };

    // Start from |S|/total_weight mapped to the three confidence bands, then
    // let the cross-validation checks promote, demote or force it (§4.5).
    let mut confidence = if magnitude > 0.7 {
        Confidence::High
    } else if magnitude >= 0.4 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    let checks = run_cross_checks(votes, cross_checks);

    if checks.agreements >= 2 && checks.disagreements == 0 {
        confidence = Confidence::High;
    }
    if checks.disagreements >= 2 {
        confidence = Confidence::Medium;
    }
    if checks.coherence_quality < 0.3 {
        confidence = Confidence::Low;
    }

    (dominant, confidence)
}

fn find(votes: &[MethodVote], method: MethodId) -> Option<&MethodVote> {
    votes.iter().find(|v| v.method == method)
}

struct CrossCheckSummary {
    agreements: u32,
    disagreements: u32,
    coherence_quality: f64,
}

/// Nine cross-validation checks (§4.5): four reliability checks plus five
/// named method-pair corroboration checks, tallying how many pairs agree or
/// disagree and the quality of the coherence-based methods, all of which
/// feed back into the confidence adjustment in [`resolve`].
fn run_cross_checks(votes: &[MethodVote], cross_checks: &mut Vec<String>) -> CrossCheckSummary {
    let mut agreements = 0u32;
    let mut disagreements = 0u32;

    // 1. Too few methods reporting to trust the aggregate.
    if votes.len() < 3 {
        cross_checks.push(format!("only {} method(s) produced a vote this minute", votes.len()));
    }

    // 2. A genuine split decision: real support on both sides.
    let wwv_weight: f64 = votes.iter().filter(|v| v.score > 0.3).map(|v| v.weight).sum();
    let wwvh_weight: f64 = votes.iter().filter(|v| v.score < -0.3).map(|v| v.weight).sum();
    if wwv_weight > 3.0 && wwvh_weight > 3.0 {
        cross_checks.push("split decision: both stations have material supporting weight".to_string());
    }

    // 3. Total weight too thin to be meaningful.
    let total_weight: f64 = votes.iter().map(|v| v.weight.abs()).sum();
    if total_weight < 5.0 {
        cross_checks.push(format!("total vote weight {total_weight:.1} is below the reliability floor"));
    }

    // 4. One method dominates the aggregate.
    if let Some(max_vote) = votes.iter().max_by(|a, b| a.weight.abs().partial_cmp(&b.weight.abs()).unwrap()) {
        if total_weight > 0.0 && max_vote.weight.abs() / total_weight > 0.6 {
            cross_checks.push(format!("{:?} alone accounts for most of the aggregate weight", max_vote.method));
        }
    }

    // 5-9: named method-pair corroboration checks; each resolved pair
    // contributes one agreement or one disagreement to the tally.
    for (a, b) in [
        (MethodId::TonePowerRatio, MethodId::BcdAmplitudeRatio),
        (MethodId::TonePowerRatio, MethodId::GroundTruth500600Hz),
        (MethodId::StationId440Hz, MethodId::TestSignal),
        (MethodId::TimingCoherence, MethodId::TickCoherence),
        (MethodId::GroundTruth500600Hz, MethodId::BcdAmplitudeRatio),
    ] {
        check_pair_agreement(votes, a, b, cross_checks, &mut agreements, &mut disagreements);
    }

    // A method reporting unusually high internal quality corroborates the
    // aggregate in its own right.
    agreements += votes.iter().filter(|v| v.quality > 0.85).count() as u32;

    let coherence_quality = [MethodId::TickCoherence, MethodId::TimingCoherence]
        .into_iter()
        .filter_map(|m| find(votes, m).map(|v| v.quality))
        .fold(1.0_f64, f64::min);

    CrossCheckSummary { agreements, disagreements, coherence_quality }
}

fn check_pair_agreement(
    votes: &[MethodVote],
    a: MethodId,
    b: MethodId,
    cross_checks: &mut Vec<String>,
    agreements: &mut u32,
    disagreements: &mut u32,
) {
    if let (Some(va), Some(vb)) = (find(votes, a), find(votes, b)) {
        if va.score.abs() > 0.3 && vb.score.abs() > 0.3 {
            if va.score.signum() != vb.score.signum() {
                *disagreements += 1;
                cross_checks.push(format!("{a:?} and {b:?} disagree"));
            } else {
                *agreements += 1;
            }
        }
    }
}

fn rms_power(samples: &[Complex]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s.norm_sqr()).sum();
    (sum / samples.len() as f64).sqrt()
}

fn test_signal_vote(minute_of_hour: u32, samples: &[Complex], _sample_rate: u32) -> Option<MethodVote> {
    if !TEST_SIGNAL_MINUTES.contains(&minute_of_hour) {
        return None;
    }

    // The scheduled station keeps transmitting through its test window; the
    // other goes quiet. We check the tail third of the minute for broadband
    // energy against the expectation for whichever station is scheduled.
    let tail = &samples[samples.len() * 2 / 3..];
    let scheduled_is_wwv = minute_of_hour == 8;
    let present = rms_power(tail) > SILENCE_RMS_THRESHOLD;

    let score = if present == scheduled_is_wwv { 1.0 } else { -1.0 };
    let score = if scheduled_is_wwv { score } else { -score };

    Some(MethodVote {
        method: MethodId::TestSignal,
        score,
        weight: MethodId::TestSignal.max_weight() * 0.6,
        quality: 0.6,
    })
}

fn station_id_440_vote(minute_of_hour: u32, samples: &[Complex], sample_rate: u32) -> Option<MethodVote> {
    if !STATION_ID_MINUTES.contains(&minute_of_hour) {
        return None;
    }

    let tone_power = goertzel_power(samples, 440.0, sample_rate);
    let reference_power = goertzel_power(samples, 600.0, sample_rate);
    let snr = snr_db(tone_power, reference_power);
    if snr < STATION_ID_SNR_THRESHOLD_DB {
        return None;
    }

    // WWV IDs at :02, WWVH at :01.
    let score = if minute_of_hour == 2 { 1.0 } else { -1.0 };

    Some(MethodVote {
        method: MethodId::StationId440Hz,
        score,
        weight: MethodId::StationId440Hz.max_weight() * (snr / 20.0).clamp(0.3, 1.0),
        quality: (snr / 20.0).clamp(0.0, 1.0),
    })
}

/// Cross-correlates the 100 Hz BCD subcarrier's expected arrival windows
/// for each station's great-circle path delay (§4.6 `tau_geo`) and compares
/// their local power, rather than searching blindly for dual peaks in the
/// whole minute.
fn bcd_amplitude_ratio_vote(samples: &[Complex], sample_rate: u32, receiver: &GeoPoint) -> Option<MethodVote> {
    let tau_wwv_ms = geo::tau_geo_ms(Station::Wwv, receiver);
    let tau_wwvh_ms = geo::tau_geo_ms(Station::Wwvh, receiver);

    let window_samples = (0.05 * sample_rate as f64) as usize;
    let power_near = |tau_ms: f64| -> f64 {
        let center = (tau_ms / 1000.0 * sample_rate as f64) as usize;
        let start = center.saturating_sub(window_samples / 2);
        let end = (center + window_samples / 2).min(samples.len());
        if start >= end {
            return 0.0;
        }
        goertzel_power(&samples[start..end], 100.0, sample_rate)
    };

    let p_wwv = power_near(tau_wwv_ms);
    let p_wwvh = power_near(tau_wwvh_ms);
    let total = p_wwv + p_wwvh;
    if total < 1e-12 {
        return None;
    }

    let score = ((p_wwv - p_wwvh) / total).clamp(-1.0, 1.0);
    let quality = total.min(1.0);

    Some(MethodVote {
        method: MethodId::BcdAmplitudeRatio,
        score,
        weight: MethodId::BcdAmplitudeRatio.max_weight() * quality,
        quality,
    })
}

fn tone_power_ratio_vote(wwv: Option<&ToneDetection>, wwvh: Option<&ToneDetection>) -> Option<MethodVote> {
    match (wwv, wwvh) {
        (Some(w), Some(h)) => {
            let diff_db = w.tone_power_db - h.tone_power_db;
            let score = (diff_db / 20.0).clamp(-1.0, 1.0);
            let quality = ((w.confidence + h.confidence) / 2.0).clamp(0.0, 1.0);
            Some(MethodVote {
                method: MethodId::TonePowerRatio,
                score,
                weight: MethodId::TonePowerRatio.max_weight() * quality,
                quality,
            })
        }
        (Some(w), None) => Some(MethodVote {
            method: MethodId::TonePowerRatio,
            score: 1.0,
            weight: MethodId::TonePowerRatio.max_weight() * w.confidence,
            quality: w.confidence,
        }),
        (None, Some(h)) => Some(MethodVote {
            method: MethodId::TonePowerRatio,
            score: -1.0,
            weight: MethodId::TonePowerRatio.max_weight() * h.confidence,
            quality: h.confidence,
        }),
        (None, None) => None,
    }
}

fn average_tick_power(samples: &[Complex], sample_rate: u32, freq_hz: f64) -> f64 {
    let block = sample_rate as usize;
    let tick_len = ((0.005 * sample_rate as f64) as usize).max(1);

    let mut total = 0.0;
    let mut n = 0u32;
    let mut i = 0;
    while i + tick_len <= samples.len() {
        total += goertzel_power(&samples[i..i + tick_len], freq_hz, sample_rate);
        n += 1;
        i += block;
    }

    if n == 0 {
        0.0
    } else {
        total / n as f64
    }
}

fn tick_coherence_vote(samples: &[Complex], sample_rate: u32) -> Option<MethodVote> {
    let wwv_power = average_tick_power(samples, sample_rate, 1000.0);
    let wwvh_power = average_tick_power(samples, sample_rate, 1200.0);
    let total = wwv_power + wwvh_power;
    if total < 1e-12 {
        return None;
    }

    let score = ((wwv_power - wwvh_power) / total).clamp(-1.0, 1.0);
    let quality = total.min(1.0);

    Some(MethodVote {
        method: MethodId::TickCoherence,
        score,
        weight: MethodId::TickCoherence.max_weight() * quality,
        quality,
    })
}

fn ground_truth_vote(minute_of_hour: u32, samples: &[Complex], sample_rate: u32) -> Option<MethodVote> {
    let is_wwv_minute = WWV_EXCLUSIVE_MINUTES.contains(&minute_of_hour);
    let is_wwvh_minute = WWVH_EXCLUSIVE_MINUTES.contains(&minute_of_hour);
    if !is_wwv_minute && !is_wwvh_minute {
        return None;
    }

    let freq_hz = if is_wwv_minute { 500.0 } else { 600.0 };
    let tone_power = goertzel_power(samples, freq_hz, sample_rate);
    let noise_power = goertzel_power(samples, freq_hz * 1.1, sample_rate);
    let snr = snr_db(tone_power, noise_power);

    // Absence is inconclusive (fade, interference) on an exclusive minute,
    // never evidence for the other station.
    if snr < GROUND_TRUTH_SNR_THRESHOLD_DB {
        return None;
    }

    let score = if is_wwv_minute { 1.0 } else { -1.0 };
    let max_weight = if STATION_ID_MINUTES.contains(&minute_of_hour) { 10.0 } else { 15.0 };

    Some(MethodVote {
        method: MethodId::GroundTruth500600Hz,
        score,
        weight: max_weight * (snr / 20.0).clamp(0.3, 1.0),
        quality: (snr / 20.0).clamp(0.0, 1.0),
    })
}

fn doppler_std(samples: &[Complex], sample_rate: u32, freq_hz: f64) -> f64 {
    const WINDOWS: usize = 10;
    let window_len = samples.len() / WINDOWS;
    if window_len == 0 {
        return 0.0;
    }

    let powers: Vec<f64> = (0..WINDOWS)
        .map(|w| {
            let start = w * window_len;
            let end = (start + window_len).min(samples.len());
            goertzel_power(&samples[start..end], freq_hz, sample_rate)
        })
        .collect();

    let mean = powers.iter().sum::<f64>() / powers.len() as f64;
    if mean < 1e-12 {
        return 0.0;
    }
    let variance = powers.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / powers.len() as f64;
    variance.sqrt() / mean
}

fn doppler_stability_vote(samples: &[Complex], sample_rate: u32) -> Option<MethodVote> {
    let wwv_std = doppler_std(samples, sample_rate, 1000.0);
    let wwvh_std = doppler_std(samples, sample_rate, 1200.0);
    let total = wwv_std + wwvh_std;
    if total < 1e-9 {
        return None;
    }

    // The more Doppler-stable path (lower relative variance) is favored.
    let score = ((wwvh_std - wwv_std) / total).clamp(-1.0, 1.0);

    Some(MethodVote {
        method: MethodId::DopplerStability,
        score,
        weight: MethodId::DopplerStability.max_weight() * 0.5,
        quality: 0.5,
    })
}

fn timing_coherence_vote(minute_of_hour: u32, wwv: Option<&ToneDetection>, wwvh: Option<&ToneDetection>) -> Option<MethodVote> {
    if !TIMING_COHERENCE_MINUTES.contains(&minute_of_hour) {
        return None;
    }

    match (wwv, wwvh) {
        (Some(w), Some(h)) => {
            let score = ((h.timing_error_ms.abs() - w.timing_error_ms.abs()) / 10.0).clamp(-1.0, 1.0);
            Some(MethodVote {
                method: MethodId::TimingCoherence,
                score,
                weight: MethodId::TimingCoherence.max_weight() * 0.7,
                quality: 0.7,
            })
        }
        (Some(_), None) => Some(MethodVote {
            method: MethodId::TimingCoherence,
            score: 1.0,
            weight: MethodId::TimingCoherence.max_weight() * 0.5,
            quality: 0.5,
        }),
        (None, Some(_)) => Some(MethodVote {
            method: MethodId::TimingCoherence,
            score: -1.0,
            weight: MethodId::TimingCoherence.max_weight() * 0.5,
            quality: 0.5,
        }),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsp::correlate::build_tone_template;

    fn inject(sample_rate: u32, total: usize, freq: f64, duration_ms: f64) -> Vec<Complex> {
        let tmpl = build_tone_template(freq, duration_ms, sample_rate);
        let mut out = vec![Complex::ZERO; total];
        for (i, s) in tmpl.iter().enumerate() {
            if i < out.len() {
                out[i] = *s;
            }
        }
        out
    }

    fn minute_at(minute_of_hour: u32) -> DateTime<Utc> {
        Utc::now().date_naive().and_hms_opt(10, minute_of_hour, 0).unwrap().and_utc()
    }

    #[test]
    fn tone_power_ratio_favors_stronger_station() {
        let wwv = ToneDetection {
            station: Station::Wwv,
            tone_freq_hz: 1000.0,
            rtp_onset: 0,
            sub_sample_refinement: 0.0,
            snr_db: 25.0,
            tone_power_db: 10.0,
            timing_error_ms: 0.1,
            confidence: 0.9,
        };
        let wwvh = ToneDetection { station: Station::Wwvh, tone_power_db: -10.0, ..wwv.clone() };
        let vote = tone_power_ratio_vote(Some(&wwv), Some(&wwvh)).unwrap();
        assert!(vote.score > 0.0);
    }

    #[test]
    fn ground_truth_applies_only_on_exclusive_minutes() {
        let sample_rate = 8_000u32;
        let samples = inject(sample_rate, sample_rate as usize, 500.0, 500.0);
        assert!(ground_truth_vote(5, &samples, sample_rate).is_none());
        let vote = ground_truth_vote(1, &samples, sample_rate);
        assert!(vote.is_some());
        assert!(vote.unwrap().score > 0.0);
    }

    #[test]
    fn discriminate_returns_unknown_with_no_signal() {
        let sample_rate = 8_000u32;
        let samples = vec![Complex::ZERO; sample_rate as usize * 5];
        let inputs = DiscriminatorInputs {
            segment_samples: &samples,
            sample_rate,
            minute_utc: minute_at(5),
            receiver_location: GeoPoint { lat_deg: 39.0, lon_deg: -98.0 },
            wwv_tone: None,
            wwvh_tone: None,
        };
        let result = discriminate(&inputs);
        assert_eq!(result.dominant, Dominant::Unknown);
    }

    #[test]
    fn discriminate_favors_wwv_on_strong_station_id_minute() {
        let sample_rate = 8_000u32;
        let samples = inject(sample_rate, sample_rate as usize * 5, 440.0, 3_000.0);
        let inputs = DiscriminatorInputs {
            segment_samples: &samples,
            sample_rate,
            minute_utc: minute_at(2),
            receiver_location: GeoPoint { lat_deg: 39.0, lon_deg: -98.0 },
            wwv_tone: None,
            wwvh_tone: None,
        };
        let result = discriminate(&inputs);
        assert_eq!(result.dominant, Dominant::Wwv);
    }

    #[test]
    fn discriminate_is_idempotent_on_the_same_segment() {
        let sample_rate = 8_000u32;
        let samples = inject(sample_rate, sample_rate as usize * 5, 440.0, 3_000.0);
        let inputs = DiscriminatorInputs {
            segment_samples: &samples,
            sample_rate,
            minute_utc: minute_at(2),
            receiver_location: GeoPoint { lat_deg: 39.0, lon_deg: -98.0 },
            wwv_tone: None,
            wwvh_tone: None,
        };
        let first = discriminate(&inputs);
        let second = discriminate(&inputs);
        assert_eq!(first.dominant, second.dominant);
        assert_eq!(first.confidence, second.confidence);

        let scores = |d: &Discrimination| d.votes.iter().map(|v| (v.method, v.score, v.weight)).collect::<Vec<_>>();
        assert_eq!(scores(&first), scores(&second));
    }
}

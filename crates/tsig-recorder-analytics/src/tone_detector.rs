//! Matched-filter WWV/WWVH/CHU minute-marker tone detection with
//! sub-sample peak refinement (§4.4).

use codec::channel::Station;
use codec::rtp::Complex;
use codec::tone::ToneDetection;
use dsp::correlate::{build_tone_template, cross_correlate_magnitude, find_peak, goertzel_power, parabolic_refine, snr_db};
use dsp::resample::Decimator;

#[derive(Debug, Clone, Copy)]
pub struct ToneDetectorConfig {
    /// Target rate for the decimated band the template is correlated
    /// against (§4.4 step 1). 3 kHz comfortably covers the 1000/1200 Hz
    /// tones plus the 1350-1450 Hz noise reference band below Nyquist.
    pub decimated_rate_hz: u32,
    /// Minimum peak-to-median correlation ratio to accept a detection
    /// (§4.4 step 3).
    pub peak_to_median_threshold: f64,
    pub noise_band_low_hz: f64,
    pub noise_band_high_hz: f64,
    /// How many seconds from the start of the segment to analyze.
    pub window_seconds: f64,
}

impl Default for ToneDetectorConfig {
    fn default() -> Self {
        Self {
            decimated_rate_hz: 3_000,
            peak_to_median_threshold: 6.0,
            noise_band_low_hz: 1_350.0,
            noise_band_high_hz: 1_450.0,
            window_seconds: 2.0,
        }
    }
}

/// Runs the matched filter independently for every candidate station at
/// this channel and returns zero or more detections (§4.4 contract,
/// "never fabricate a detection").
pub fn detect_tones(
    samples: &[Complex],
    sample_rate: u32,
    first_sample_rtp: u32,
    stations: &[Station],
    cfg: &ToneDetectorConfig,
) -> Vec<ToneDetection> {
    let window_len = ((cfg.window_seconds * sample_rate as f64) as usize).min(samples.len());
    let window = &samples[..window_len];

    let decimator = Decimator::new(sample_rate, cfg.decimated_rate_hz);
    let decimated = decimator.process(window);
    let decimated_rate = decimator.output_rate(sample_rate);

    let mut out = Vec::new();
    for &station in stations {
        if let Some(detection) =
            detect_one_station(&decimated, decimated_rate, window, sample_rate, first_sample_rtp, station, cfg)
        {
            out.push(detection);
        }
    }

    out
}

fn detect_one_station(
    decimated: &[Complex],
    decimated_rate: u32,
    full_rate_window: &[Complex],
    sample_rate: u32,
    first_sample_rtp: u32,
    station: Station,
    cfg: &ToneDetectorConfig,
) -> Option<ToneDetection> {
    let freq_hz = station.tone_freq_hz();
    let duration_ms = station.tone_duration_ms();
    let template = build_tone_template(freq_hz, duration_ms, decimated_rate);

    if template.len() + 2 > decimated.len() {
        return None;
    }

    let corr = cross_correlate_magnitude(decimated, &template);
    let (peak_idx, _peak_val, ratio) = find_peak(&corr);

    if !ratio.is_finite() || ratio < cfg.peak_to_median_threshold {
        return None;
    }

    let refine = if peak_idx > 0 && peak_idx + 1 < corr.len() {
        parabolic_refine(corr[peak_idx - 1], corr[peak_idx], corr[peak_idx + 1])
    } else {
        0.0
    };

    // corr[k] aligns the template's end to signal index k; the onset is
    // template.len() - 1 samples earlier.
    let onset_decimated = peak_idx as f64 - (template.len() as f64 - 1.0) + refine;
    if onset_decimated < 0.0 {
        return None;
    }

    let factor = sample_rate as f64 / decimated_rate as f64;
    let onset_full_rate = onset_decimated * factor;

    let expected_onset_sec = 0.0; // tone is expected at the top of the minute
    let timing_error_ms = (onset_full_rate / sample_rate as f64 - expected_onset_sec) * 1000.0;

    // Measure SNR on the full-rate window: in-band power at the tone
    // frequency vs. the adjacent noise-reference band (§4.4 step 6).
    let tone_power = goertzel_power(full_rate_window, freq_hz, sample_rate);
    let noise_mid = (cfg.noise_band_low_hz + cfg.noise_band_high_hz) / 2.0;
    let noise_power = goertzel_power(full_rate_window, noise_mid, sample_rate);
    let snr = snr_db(tone_power, noise_power);

    let confidence = ((snr / 30.0) * 0.7 + (ratio / 20.0) * 0.3).clamp(0.0, 1.0);

    let rtp_onset = first_sample_rtp.wrapping_add(onset_full_rate.round() as i64 as u32);

    Some(ToneDetection {
        station,
        tone_freq_hz: freq_hz,
        rtp_onset,
        sub_sample_refinement: refine,
        snr_db: snr,
        tone_power_db: 10.0 * tone_power.max(1e-15).log10(),
        timing_error_ms,
        confidence,
    })
}

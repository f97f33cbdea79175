//! Stateful establishment and update of the per-channel [`TimeSnap`] (§4.3).
//!
//! Candidate anchors are queued as `pending` and only promoted to `applied`
//! at a segment boundary: pending TimeSnap updates apply only at segment
//! boundaries, never mid-segment. This keeps every sample within
//! one [`codec::segment::Segment`] projected through a single, unchanging
//! anchor.

use chrono::{DateTime, Utc};
use codec::channel::Station;
use codec::rtp::rtp_ts_diff;
use codec::timesnap::{TimeSnap, TimeSnapSource};
use codec::tone::ToneDetection;

/// Minimum SNR (dB) for a tone detection to be considered for a new anchor.
/// Below this the matched filter is too easily fooled by noise (§4.4 step 3
/// sets the correlation-ratio gate; this is the analytics-side acceptance
/// gate on top of it).
const MIN_SNR_DB: f64 = 10.0;

/// Station priority for timing anchors: WWV and CHU carry a tighter,
/// better-characterized timing chain than WWVH (§4.3 "prefer ... in order
/// WWV > CHU > WWVH when multiple are available").
fn station_priority(station: Station) -> u8 {
    match station {
        Station::Wwv => 2,
        Station::Chu => 2,
        Station::Wwvh => 1,
    }
}

#[derive(Debug, Clone)]
struct PendingSnap {
    candidate: TimeSnap,
    quality_score: f64,
}

/// Owns one channel's current applied [`TimeSnap`] plus any pending
/// candidate awaiting the next segment boundary.
pub struct TimeSnapManager {
    applied: TimeSnap,
    pending: Option<PendingSnap>,
    /// (rtp_ts of onset, utc at onset) from the most recent accepted
    /// detection of the anchoring station, used to measure PPM drift
    /// between two detections of the same station (§4.3 "PPM drift
    /// estimate ... between consecutive same-station detections").
    last_anchor_tone: Option<(Station, u32, DateTime<Utc>)>,
    sample_rate: u32,
}

impl TimeSnapManager {
    pub fn new(sample_rate: u32, now: DateTime<Utc>, rtp_ts_anchor: u32) -> Self {
        Self {
            applied: TimeSnap::wall_clock_fallback(now, rtp_ts_anchor),
            pending: None,
            last_anchor_tone: None,
            sample_rate,
        }
    }

    pub fn current(&self) -> &TimeSnap {
        &self.applied
    }

    /// Restores a manager from a previously persisted, already-validated
    /// `TimeSnap` (§6 "State persistence"). No pending candidate or PPM
    /// history survives a restart; both rebuild from fresh detections.
    pub fn from_persisted(applied: TimeSnap, sample_rate: u32) -> Self {
        Self { applied, pending: None, last_anchor_tone: None, sample_rate }
    }

    fn source_for(station: Station) -> TimeSnapSource {
        match station {
            Station::Wwv => TimeSnapSource::WwvTone,
            Station::Wwvh => TimeSnapSource::WwvhTone,
            Station::Chu => TimeSnapSource::ChuTone,
        }
    }

    /// Considers a tone detection as a candidate anchor, queuing it as
    /// `pending` if it beats whatever is already pending (§4.3 "a higher
    /// quality candidate can displace a lower quality one before the next
    /// boundary"). Never touches `applied` directly.
    pub fn consider_detection(&mut self, detection: &ToneDetection, minute_start_utc: DateTime<Utc>) {
        if detection.snr_db < MIN_SNR_DB {
            return;
        }

        let onset_utc = minute_start_utc
            + chrono::Duration::nanoseconds(
                (detection.rtp_onset as f64 / self.sample_rate as f64 * 1.0e9) as i64,
            );

        let quality_score = detection.snr_db.max(0.0) * 0.6
            + detection.confidence * 20.0
            + station_priority(detection.station) as f64 * 5.0;

        if let Some(existing) = &self.pending {
            if existing.quality_score >= quality_score {
                return;
            }
        }

        let (ppm_offset, ppm_confidence) = self.measure_ppm(detection, onset_utc);

        let candidate = TimeSnap {
            rtp_ts_anchor: detection.rtp_onset,
            utc_anchor: onset_utc,
            established_at: onset_utc,
            source: Self::source_for(detection.station),
            confidence: detection.confidence,
            station: Some(detection.station),
            ppm_offset,
            ppm_confidence,
            age_minutes: 0.0,
        };

        self.pending = Some(PendingSnap { candidate, quality_score });
    }

    /// Estimates clock drift in PPM between this detection and the last
    /// accepted detection of the same station:
    /// `ppm = ((rtp2 - rtp1) / (utc2 - utc1) / sample_rate - 1) * 1e6`,
    /// smoothed with the prior estimate via an EMA (alpha = 0.5, §4.3).
    fn measure_ppm(&mut self, detection: &ToneDetection, onset_utc: DateTime<Utc>) -> (f64, f64) {
        const ALPHA: f64 = 0.5;

        let result = match self.last_anchor_tone {
            Some((station, last_rtp, last_utc)) if station == detection.station => {
                let elapsed_s = (onset_utc - last_utc).num_milliseconds() as f64 / 1000.0;
                if elapsed_s > 1.0 {
                    let rtp_ticks = rtp_ts_diff(detection.rtp_onset, last_rtp) as f64;
                    let measured_rate = rtp_ticks / elapsed_s;
                    let measured_ppm = (measured_rate / self.sample_rate as f64 - 1.0) * 1.0e6;

                    let prior_ppm = self.applied.ppm_offset;
                    let smoothed = if self.applied.ppm_confidence > 0.0 {
                        ALPHA * measured_ppm + (1.0 - ALPHA) * prior_ppm
                    } else {
                        measured_ppm
                    };
                    Some((smoothed, 1.0))
                } else {
                    None
                }
            }
            _ => None,
        };

        self.last_anchor_tone = Some((detection.station, detection.rtp_onset, onset_utc));

        result.unwrap_or((self.applied.ppm_offset, self.applied.ppm_confidence * 0.9))
    }

    /// Promotes `pending` to `applied` if one exists, otherwise ages the
    /// current `applied` snap. Must be called exactly once per segment
    /// boundary: never mid-segment.
    pub fn apply_pending_at_boundary(&mut self, boundary_utc: DateTime<Utc>) {
        if let Some(pending) = self.pending.take() {
            self.applied = pending.candidate;
            return;
        }

        let age_minutes =
            (boundary_utc - self.applied.established_at).num_seconds() as f64 / 60.0;
        self.applied.age_minutes = age_minutes.max(0.0);
    }
}

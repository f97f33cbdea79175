//! Tone detection result record (§3 "ToneDetection").

use serde::{Deserialize, Serialize};

use crate::channel::Station;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneDetection {
    pub station: Station,
    pub tone_freq_hz: f64,
    /// RTP timestamp of the integer-sample onset.
    pub rtp_onset: u32,
    /// Sub-sample parabolic refinement, bounded to `[-0.5, 0.5]` (§4.4).
    pub sub_sample_refinement: f64,
    pub snr_db: f64,
    pub tone_power_db: f64,
    pub timing_error_ms: f64,
    pub confidence: f64,
}

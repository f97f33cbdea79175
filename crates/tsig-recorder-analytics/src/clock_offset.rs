//! Clock offset estimation: `D_clock = T_arrival - (T_emission + tau_geo +
//! tau_iono + tau_mode)`, tracked per station through a Kalman filter with
//! multi-broadcast fusion across channels (§4.6).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use codec::channel::{GeoPoint, Station};
use codec::discrimination::{ClockOffset, QualityGrade};
use codec::tone::ToneDetection;
use dsp::kalman::KalmanState;

use crate::geo::{self, PropagationMode};

/// Per-station fusion calibration, smoothed across channels sharing that
/// station with an EMA (§4.6 "multi-broadcast fusion ... per-station
/// calibration via EMA").
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct StationCalibration {
    pub offset_ms: f64,
    pub confidence: f64,
}

impl Default for StationCalibration {
    fn default() -> Self {
        Self { offset_ms: 0.0, confidence: 0.0 }
    }
}

/// Tracks the Kalman-filtered `D_clock` estimate for every station observed
/// on this receiver, plus the cross-station fusion calibration.
pub struct ClockOffsetEstimator {
    receiver_location: GeoPoint,
    per_station: HashMap<Station, KalmanState>,
    calibration: HashMap<Station, StationCalibration>,
}

/// One raw clock-offset measurement before Kalman filtering (§4.6).
pub struct RawMeasurement {
    pub station: Station,
    pub minute_utc: DateTime<Utc>,
    pub t_arrival_ms: f64,
    pub t_emission_ms: f64,
    pub solar_zenith_deg: f64,
    pub delay_spread_ms: f64,
    pub doppler_std_hz: f64,
    pub snr_db: f64,
}

impl ClockOffsetEstimator {
    pub fn new(receiver_location: GeoPoint) -> Self {
        Self {
            receiver_location,
            per_station: HashMap::new(),
            calibration: HashMap::new(),
        }
    }

    /// Derives a [`RawMeasurement`] from a tone detection's onset timing,
    /// with the detection's measured RTP onset converted to arrival time by
    /// the caller (the estimator itself only sees the physical quantities,
    /// §4.6 contract).
    pub fn measurement_from_tone(
        &self,
        detection: &ToneDetection,
        minute_utc: DateTime<Utc>,
        t_arrival_ms: f64,
    ) -> RawMeasurement {
        // The minute marker tone is emitted exactly at the top of its
        // minute, by definition of the broadcast schedule.
        let t_emission_ms = 0.0;
        RawMeasurement {
            station: detection.station,
            minute_utc,
            t_arrival_ms,
            t_emission_ms,
            solar_zenith_deg: solar_zenith_estimate(minute_utc, &self.receiver_location),
            delay_spread_ms: detection.sub_sample_refinement.abs() * 10.0,
            doppler_std_hz: 0.0,
            snr_db: detection.snr_db,
        }
    }

    /// Feeds one measurement into the station's Kalman filter and returns
    /// the resulting [`ClockOffset`] (§4.6).
    pub fn update(&mut self, measurement: &RawMeasurement) -> ClockOffset {
        let mode = geo::solve_mode(measurement.delay_spread_ms, measurement.doppler_std_hz);
        let tau_geo = geo::tau_geo_ms(measurement.station, &self.receiver_location);
        let tau_iono = geo::tau_iono_ms(
            station_carrier_hint_hz(measurement.station),
            measurement.solar_zenith_deg,
        );
        let tau_mode = mode.penalty_ms();

        let d_clock = measurement.t_arrival_ms
            - (measurement.t_emission_ms + tau_geo + tau_iono + tau_mode);

        let kalman = self.per_station.entry(measurement.station).or_default();
        let update = kalman.update(d_clock);

        let fused = self.fuse(measurement.station, update.estimate_ms, measurement.snr_db, mode);

        ClockOffset {
            minute_utc: measurement.minute_utc,
            station: measurement.station,
            d_clock_ms: fused,
            uncertainty_ms: update.uncertainty_ms,
            quality_grade: QualityGrade::from_uncertainty_ms(Some(update.uncertainty_ms)),
            mode_hint: format!("{mode:?}"),
            convergence_state: update.state,
        }
    }

    /// Blends this station's fresh Kalman estimate into its running
    /// per-station calibration via an EMA (alpha = 0.5), weighted by SNR and
    /// the propagation mode's prior weight, and returns the fused offset
    /// (§4.6 multi-broadcast fusion).
    fn fuse(&mut self, station: Station, estimate_ms: f64, snr_db: f64, mode: PropagationMode) -> f64 {
        const ALPHA: f64 = 0.5;

        let weight = (snr_db.max(0.0) / 30.0).clamp(0.0, 1.0) * mode.prior_weight();
        let entry = self.calibration.entry(station).or_default();

        if entry.confidence <= 0.0 {
            entry.offset_ms = estimate_ms;
            entry.confidence = weight;
        } else {
            entry.offset_ms = ALPHA * estimate_ms + (1.0 - ALPHA) * entry.offset_ms;
            entry.confidence = ALPHA * weight + (1.0 - ALPHA) * entry.confidence;
        }

        entry.offset_ms
    }

    pub fn calibration_for(&self, station: Station) -> StationCalibration {
        self.calibration.get(&station).copied().unwrap_or_default()
    }

    /// Exposes every station's Kalman state for persistence (§6 "State
    /// persistence": one JSON file per channel covers TimeSnap/PPM/Kalman).
    pub fn kalman_states(&self) -> &HashMap<Station, KalmanState> {
        &self.per_station
    }

    /// Exposes the fusion calibration map for persistence.
    pub fn calibrations(&self) -> &HashMap<Station, StationCalibration> {
        &self.calibration
    }

    /// Restores a previously persisted receiver into a fresh estimator, used
    /// at startup after loading `ChannelState`/`FusionState` from disk.
    pub fn restore(
        receiver_location: GeoPoint,
        per_station: HashMap<Station, KalmanState>,
        calibration: HashMap<Station, StationCalibration>,
    ) -> Self {
        Self { receiver_location, per_station, calibration }
    }
}

/// CHU, WWV and WWVH all operate at several carrier frequencies; this
/// estimator isn't given the channel's exact carrier, so it uses a
/// representative mid-HF frequency for the ionospheric delay model. Good
/// enough for the coarse `tau_iono` approximation in [`crate::geo`].
fn station_carrier_hint_hz(station: Station) -> f64 {
    match station {
        Station::Wwv | Station::Wwvh => 10_000_000.0,
        Station::Chu => 7_850_000.0,
    }
}

/// A coarse solar zenith angle estimate at the receiver for the given UTC
/// instant, used only to modulate the ionospheric delay model's day/night
/// trend, not a navigation-grade ephemeris.
fn solar_zenith_estimate(at: DateTime<Utc>, receiver: &GeoPoint) -> f64 {
    use chrono::Timelike;

    let hour_angle_deg = (at.hour() as f64 + at.minute() as f64 / 60.0 - 12.0) * 15.0 - receiver.lon_deg;
    let declination_deg = 0.0; // equinox approximation

    let lat_rad = receiver.lat_deg.to_radians();
    let decl_rad = declination_deg.to_radians();
    let hour_rad = hour_angle_deg.to_radians();

    let cos_zenith =
        lat_rad.sin() * decl_rad.sin() + lat_rad.cos() * decl_rad.cos() * hour_rad.cos();
    cos_zenith.clamp(-1.0, 1.0).acos().to_degrees()
}

//! The (RTP, UTC) anchor pair (§3 "TimeSnap", §4.3) and its pure projection
//! function. The stateful establishment/update logic lives in the
//! `tsig-recorder-analytics` crate's `TimeSnapManager`; this module only
//! carries the data and its pure projection.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Station;
use crate::rtp::rtp_ts_diff;

/// Where a TimeSnap's anchor came from, ordered roughly by trustworthiness
/// (§3, §4.3 source hierarchy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSnapSource {
    WwvTone,
    WwvhTone,
    ChuTone,
    Ntp,
    WallClock,
}

/// Quality grade derived from the source hierarchy table (§4.3). A
/// tone-sourced anchor downgrades from `ToneLocked` to `Interpolated` as it
/// ages past 5 minutes without a fresh detection, and further to
/// `WallClock` after an hour (§4.3 source hierarchy, §4.3 failure
/// semantics: "no detection -> keep last TimeSnap, age it, downgrade
/// quality").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSnapGrade {
    ToneLocked,
    NtpSynced,
    Interpolated,
    WallClock,
}

/// An (RTP timestamp, UTC) anchor pair used to project any RTP timestamp to
/// UTC, plus PPM drift state (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSnap {
    pub rtp_ts_anchor: u32,
    pub utc_anchor: DateTime<Utc>,
    pub established_at: DateTime<Utc>,
    pub source: TimeSnapSource,
    pub confidence: f64,
    pub station: Option<Station>,
    pub ppm_offset: f64,
    pub ppm_confidence: f64,
    /// Minutes elapsed since `established_at` without a fresher anchor
    /// replacing this one. Bookkeeping only, never fed back into
    /// `utc_at`'s projection.
    pub age_minutes: f64,
}

impl TimeSnap {
    /// A TimeSnap with no real reference, used only until the first tone or
    /// NTP anchor is established.
    pub fn wall_clock_fallback(now: DateTime<Utc>, rtp_ts_anchor: u32) -> Self {
        Self {
            rtp_ts_anchor,
            utc_anchor: now,
            established_at: now,
            source: TimeSnapSource::WallClock,
            confidence: 0.05,
            station: None,
            ppm_offset: 0.0,
            ppm_confidence: 0.0,
            age_minutes: 0.0,
        }
    }

    /// `clock_ratio = 1 + ppm/1e6` when PPM confidence exceeds 0.3, else 1
    /// (§4.3 contract).
    pub fn clock_ratio(&self) -> f64 {
        if self.ppm_confidence > 0.3 {
            1.0 + self.ppm_offset / 1.0e6
        } else {
            1.0
        }
    }

    /// `utc_at(rtp_ts) = utc_anchor + ((rtp_ts - rtp_anchor) / sample_rate) * clock_ratio`
    /// (§4.3 contract: a pure function of (TimeSnap, rtp_ts)).
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use tsig_recorder_codec::timesnap::{TimeSnap, TimeSnapSource};
    ///
    /// let now = Utc::now();
    /// let snap = TimeSnap {
    ///     rtp_ts_anchor: 0,
    ///     utc_anchor: now,
    ///     established_at: now,
    ///     source: TimeSnapSource::WwvTone,
    ///     confidence: 0.9,
    ///     station: None,
    ///     ppm_offset: 0.0,
    ///     ppm_confidence: 1.0,
    ///     age_minutes: 0.0,
    /// };
    ///
    /// let one_second_later = snap.utc_at(20_000, 20_000);
    /// assert_eq!((one_second_later - now).num_milliseconds(), 1000);
    /// ```
    pub fn utc_at(&self, rtp_ts: u32, sample_rate: u32) -> DateTime<Utc> {
        let ticks = rtp_ts_diff(rtp_ts, self.rtp_ts_anchor) as f64;
        let seconds = (ticks / sample_rate as f64) * self.clock_ratio();
        self.utc_anchor + ChronoDuration::nanoseconds((seconds * 1.0e9) as i64)
    }

    /// Grade per the §4.3 source hierarchy table, age-adjusted for
    /// tone-sourced anchors: fresh (<=5 min) is `ToneLocked`, 5-60 min is
    /// `Interpolated`, beyond that it has effectively decayed to
    /// `WallClock` precision.
    pub fn grade(&self) -> TimeSnapGrade {
        match self.source {
            TimeSnapSource::WwvTone | TimeSnapSource::WwvhTone | TimeSnapSource::ChuTone => {
                if self.age_minutes <= 5.0 {
                    TimeSnapGrade::ToneLocked
                } else if self.age_minutes <= 60.0 {
                    TimeSnapGrade::Interpolated
                } else {
                    TimeSnapGrade::WallClock
                }
            }
            TimeSnapSource::Ntp => TimeSnapGrade::NtpSynced,
            TimeSnapSource::WallClock => TimeSnapGrade::WallClock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(source: TimeSnapSource, age_minutes: f64) -> TimeSnap {
        let now = Utc::now();
        TimeSnap {
            rtp_ts_anchor: 1_000,
            utc_anchor: now,
            established_at: now,
            source,
            confidence: 0.9,
            station: None,
            ppm_offset: 0.0,
            ppm_confidence: 1.0,
            age_minutes,
        }
    }

    #[test]
    fn projection_is_linear_in_rtp() {
        let s = snap(TimeSnapSource::WwvTone, 0.0);
        let a = s.utc_at(1_000, 20_000);
        let b = s.utc_at(21_000, 20_000);
        assert_eq!((b - a).num_milliseconds(), 1000);
    }

    #[test]
    fn low_confidence_ppm_is_ignored() {
        let mut s = snap(TimeSnapSource::Ntp, 0.0);
        s.ppm_offset = 50.0;
        s.ppm_confidence = 0.1;
        assert_eq!(s.clock_ratio(), 1.0);
    }

    #[test]
    fn grade_downgrades_with_age() {
        assert_eq!(snap(TimeSnapSource::WwvTone, 1.0).grade(), TimeSnapGrade::ToneLocked);
        assert_eq!(snap(TimeSnapSource::WwvTone, 30.0).grade(), TimeSnapGrade::Interpolated);
        assert_eq!(snap(TimeSnapSource::WwvTone, 90.0).grade(), TimeSnapGrade::WallClock);
        assert_eq!(snap(TimeSnapSource::Ntp, 90.0).grade(), TimeSnapGrade::NtpSynced);
    }
}

//! Channel identity and static per-channel metadata (§3 "Channel").

use serde::{Deserialize, Serialize};

/// The station a broadcast can be attributed to. WWV and WWVH share
/// 2.5/5/10/15 MHz and require discrimination; CHU has exclusive
/// frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Station {
    Wwv,
    Wwvh,
    Chu,
}

impl Station {
    /// Nominal minute-marker tone frequency in Hz (§4.4).
    pub fn tone_freq_hz(&self) -> f64 {
        match self {
            Station::Wwv => 1000.0,
            Station::Chu => 1000.0,
            Station::Wwvh => 1200.0,
        }
    }

    /// Nominal tone-burst duration in milliseconds (§4.4, §9 flag: the
    /// spec fixes these per-station rather than unifying them).
    pub fn tone_duration_ms(&self) -> f64 {
        match self {
            Station::Wwv | Station::Wwvh => 800.0,
            Station::Chu => 500.0,
        }
    }
}

/// A channel's stable name with canonical three-form conversion: the
/// human-readable label, a filesystem/directory-safe slug, and a compact
/// lookup key.
///
/// # Examples
///
/// ```
/// use tsig_recorder_codec::channel::ChannelName;
///
/// let name = ChannelName::new("WWV 10 MHz");
/// assert_eq!(name.human(), "WWV 10 MHz");
/// assert_eq!(name.directory_safe(), "WWV_10_MHz");
/// assert_eq!(name.key(), "wwv_10_mhz");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(human: impl Into<String>) -> Self {
        Self(human.into())
    }

    pub fn human(&self) -> &str {
        &self.0
    }

    pub fn directory_safe(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect()
    }

    pub fn key(&self) -> String {
        self.directory_safe().to_lowercase()
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point on the Earth's surface, used for great-circle propagation delay
/// (§4.6 `tau_geo`) and BCD dual-peak station assignment (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

impl GeoPoint {
    /// Great-circle distance in kilometers via the haversine formula.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsig_recorder_codec::channel::GeoPoint;
    ///
    /// let a = GeoPoint { lat_deg: 0.0, lon_deg: 0.0 };
    /// let b = GeoPoint { lat_deg: 0.0, lon_deg: 1.0 };
    /// let km = a.distance_km(&b);
    /// assert!((km - 111.19).abs() < 1.0);
    /// ```
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let lat1 = self.lat_deg.to_radians();
        let lat2 = other.lat_deg.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.lon_deg - self.lon_deg).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_KM * c
    }
}

/// Static per-channel configuration, carried alongside every [`crate::segment::Segment`]
/// (§3 "Channel" attributes, §6 "Inbound (channel config)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub name: ChannelName,
    pub center_frequency_hz: f64,
    pub sample_rate: u32,
    pub expected_stations: Vec<Station>,
    #[serde(default = "ChannelMeta::default_blocktime_ms")]
    pub blocktime_ms: u32,
    #[serde(default = "ChannelMeta::default_max_gap_seconds")]
    pub max_gap_seconds: u32,
}

impl ChannelMeta {
    fn default_blocktime_ms() -> u32 {
        20
    }

    fn default_max_gap_seconds() -> u32 {
        60
    }

    /// `samples_per_packet = sample_rate * blocktime_ms / 1000` (§6).
    pub fn samples_per_packet(&self) -> u32 {
        self.sample_rate * self.blocktime_ms / 1000
    }

    /// Number of RTP ticks in one archived minute: `sample_rate * 60`.
    pub fn ticks_per_minute(&self) -> u64 {
        self.sample_rate as u64 * 60
    }

    /// Whether this channel's nominal frequency is one WWV and WWVH share,
    /// per the GLOSSARY (2.5/5/10/15 MHz).
    pub fn is_shared_frequency(&self) -> bool {
        let shared = [2_500_000.0, 5_000_000.0, 10_000_000.0, 15_000_000.0];
        shared
            .iter()
            .any(|f| (self.center_frequency_hz - f).abs() < 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_form_conversion() {
        let n = ChannelName::new("CHU 7.85 MHz");
        assert_eq!(n.human(), "CHU 7.85 MHz");
        assert_eq!(n.directory_safe(), "CHU_7.85_MHz");
        assert_eq!(n.key(), "chu_7.85_mhz");
    }

    #[test]
    fn samples_per_packet_default_blocktime() {
        let meta = ChannelMeta {
            name: ChannelName::new("WWV 10 MHz"),
            center_frequency_hz: 10_000_000.0,
            sample_rate: 20_000,
            expected_stations: vec![Station::Wwv, Station::Wwvh],
            blocktime_ms: 20,
            max_gap_seconds: 60,
        };

        assert_eq!(meta.samples_per_packet(), 400);
        assert_eq!(meta.ticks_per_minute(), 1_200_000);
        assert!(meta.is_shared_frequency());
    }
}

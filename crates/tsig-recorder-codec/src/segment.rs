//! Minute-aligned archival units (§3 "Segment", "GapRecord") and the
//! invariants that every published segment must satisfy.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelMeta;
use crate::rtp::{Complex, GapReason};

/// A documented absence of samples, filled with zeros (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapRecord {
    pub sample_index: u64,
    pub samples_filled: u64,
    pub packets_lost: u32,
    pub rtp_ts_before: u32,
    pub rtp_ts_after: u32,
    pub reason: GapReason,
}

/// A minute-aligned run of exactly `sample_rate * 60` complex samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub channel: ChannelMeta,
    pub first_sample_rtp: u32,
    /// Derived UTC at the first sample; always a pure function of the
    /// channel's TimeSnap at publish time, never wall clock.
    pub first_sample_utc: Option<chrono::DateTime<chrono::Utc>>,
    pub samples: Vec<Complex>,
    pub gaps: Vec<GapRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("segment sample count {actual} does not equal required {required}; this is an upstream accounting bug")]
    WrongLength { actual: usize, required: usize },
}

impl Segment {
    /// Validates the segment's sample-count invariant. Per §4.2's failure
    /// semantics this is not a recoverable `Result` path in the finalizer ,
    /// it is surfaced here as a `Result` purely so callers doing offline
    /// validation (tests, the archive reader) can check it without a panic;
    /// the live finalizer calls [`Segment::assert_valid`] instead.
    pub fn check_length(&self) -> Result<(), SegmentError> {
        let required = self.channel.ticks_per_minute() as usize;
        if self.samples.len() != required {
            return Err(SegmentError::WrongLength {
                actual: self.samples.len(),
                required,
            });
        }
        Ok(())
    }

    /// §4.2 failure semantics: a malformed segment must never be published.
    /// This is a bug in upstream accounting, not a runtime condition, so it
    /// aborts the process.
    pub fn assert_valid(&self) {
        if let Err(e) = self.check_length() {
            panic!("segment length invariant violated: {e}");
        }

        let filled: u64 = self.gaps.iter().map(|g| g.samples_filled).sum();
        let required = self.channel.ticks_per_minute();
        assert!(
            filled <= required,
            "segment invariant violated: gap-filled samples ({filled}) exceed segment length ({required})"
        );
    }

    /// Total samples covered by gap records: `sum(gap.samples_filled)`.
    pub fn filled_sample_count(&self) -> u64 {
        self.gaps.iter().map(|g| g.samples_filled).sum()
    }

    pub fn non_filled_sample_count(&self) -> u64 {
        self.channel.ticks_per_minute() - self.filled_sample_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelName, Station};

    fn meta() -> ChannelMeta {
        ChannelMeta {
            name: ChannelName::new("WWV 10 MHz"),
            center_frequency_hz: 10_000_000.0,
            sample_rate: 20_000,
            expected_stations: vec![Station::Wwv],
            blocktime_ms: 20,
            max_gap_seconds: 60,
        }
    }

    #[test]
    fn rejects_wrong_length() {
        let seg = Segment {
            channel: meta(),
            first_sample_rtp: 0,
            first_sample_utc: None,
            samples: vec![Complex::ZERO; 10],
            gaps: vec![],
        };

        assert!(seg.check_length().is_err());
    }

    #[test]
    fn accepts_exact_length() {
        let meta = meta();
        let n = meta.ticks_per_minute() as usize;
        let seg = Segment {
            channel: meta,
            first_sample_rtp: 0,
            first_sample_utc: None,
            samples: vec![Complex::ZERO; n],
            gaps: vec![],
        };

        assert!(seg.check_length().is_ok());
        seg.assert_valid();
    }
}

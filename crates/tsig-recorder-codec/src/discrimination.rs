//! Per-minute discrimination and clock-offset result records
//! (§3 "Discrimination", "ClockOffset").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Station;

/// A single voting method's contribution (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodId {
    TestSignal,
    StationId440Hz,
    BcdAmplitudeRatio,
    TonePowerRatio,
    TickCoherence,
    GroundTruth500600Hz,
    DopplerStability,
    TimingCoherence,
}

impl MethodId {
    pub const ALL: [MethodId; 8] = [
        MethodId::TestSignal,
        MethodId::StationId440Hz,
        MethodId::BcdAmplitudeRatio,
        MethodId::TonePowerRatio,
        MethodId::TickCoherence,
        MethodId::GroundTruth500600Hz,
        MethodId::DopplerStability,
        MethodId::TimingCoherence,
    ];

    /// Maximum weight a method can contribute (§4.5 table). Ground truth's
    /// max weight varies by minute (15 on exclusive minutes, 10 on 1-2) and
    /// is resolved by the discriminator itself, not here.
    pub fn max_weight(&self) -> f64 {
        match self {
            MethodId::TestSignal => 15.0,
            MethodId::StationId440Hz => 10.0,
            MethodId::BcdAmplitudeRatio => 10.0,
            MethodId::TonePowerRatio => 10.0,
            MethodId::TickCoherence => 5.0,
            MethodId::GroundTruth500600Hz => 15.0,
            MethodId::DopplerStability => 2.0,
            MethodId::TimingCoherence => 3.0,
        }
    }
}

/// One method's signed, normalized vote plus the weight it actually carried
/// for this minute (0 if inapplicable or disabled, §4.5 failure semantics).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MethodVote {
    pub method: MethodId,
    /// In `[-1, 1]`; positive favors WWV, negative favors WWVH.
    pub score: f64,
    pub weight: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dominant {
    Wwv,
    Wwvh,
    Balanced,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrimination {
    pub minute_utc: DateTime<Utc>,
    pub votes: Vec<MethodVote>,
    pub dominant: Dominant,
    pub confidence: Confidence,
    pub cross_checks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    A,
    B,
    C,
    D,
    X,
}

impl QualityGrade {
    /// A < 1ms, B < 3ms, C < 10ms, D >= 10ms, X = invalid (§4.6).
    pub fn from_uncertainty_ms(uncertainty_ms: Option<f64>) -> Self {
        match uncertainty_ms {
            None => QualityGrade::X,
            Some(u) if u < 1.0 => QualityGrade::A,
            Some(u) if u < 3.0 => QualityGrade::B,
            Some(u) if u < 10.0 => QualityGrade::C,
            Some(_) => QualityGrade::D,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    Acquiring,
    Converging,
    Locked,
    Reacquire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockOffset {
    pub minute_utc: DateTime<Utc>,
    pub station: Station,
    pub d_clock_ms: f64,
    pub uncertainty_ms: f64,
    pub quality_grade: QualityGrade,
    pub mode_hint: String,
    pub convergence_state: ConvergenceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_thresholds() {
        assert_eq!(QualityGrade::from_uncertainty_ms(Some(0.5)), QualityGrade::A);
        assert_eq!(QualityGrade::from_uncertainty_ms(Some(2.0)), QualityGrade::B);
        assert_eq!(QualityGrade::from_uncertainty_ms(Some(9.0)), QualityGrade::C);
        assert_eq!(QualityGrade::from_uncertainty_ms(Some(50.0)), QualityGrade::D);
        assert_eq!(QualityGrade::from_uncertainty_ms(None), QualityGrade::X);
    }
}

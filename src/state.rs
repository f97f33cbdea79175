//! Versioned JSON state persistence for TimeSnap/PPM/Kalman state (one file
//! per channel) and fusion calibration (one file, process-wide), per §6
//! "State persistence" and SPEC_FULL §C's schema/range-check detail.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use codec::channel::Station;
use codec::timesnap::TimeSnap;
use dsp::kalman::KalmanState;
use serde::{Deserialize, Serialize};

pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported schema version {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("ppm_offset {0} out of the +/-200 ppm sanity range")]
    PpmOutOfRange(f64),
    #[error("confidence {0} out of the 0.0..=1.0 range")]
    ConfidenceOutOfRange(f64),
    #[error("kalman variance {0} is not positive")]
    InvalidKalmanVariance(f64),
}

/// One channel's persisted TimeSnap and per-station Kalman state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub schema_version: u32,
    pub time_snap: TimeSnap,
    pub kalman: HashMap<Station, KalmanState>,
}

impl ChannelState {
    pub fn new(time_snap: TimeSnap) -> Self {
        Self { schema_version: STATE_SCHEMA_VERSION, time_snap, kalman: HashMap::new() }
    }

    /// Range-checks a loaded state before it is trusted (§6/§7: "state
    /// corruption ... reset that state, log, restart acquisition").
    pub fn validate(&self) -> Result<(), StateError> {
        if self.schema_version != STATE_SCHEMA_VERSION {
            return Err(StateError::SchemaMismatch {
                found: self.schema_version,
                expected: STATE_SCHEMA_VERSION,
            });
        }
        if !(-200.0..=200.0).contains(&self.time_snap.ppm_offset) {
            return Err(StateError::PpmOutOfRange(self.time_snap.ppm_offset));
        }
        if !(0.0..=1.0).contains(&self.time_snap.confidence) {
            return Err(StateError::ConfidenceOutOfRange(self.time_snap.confidence));
        }
        for kalman in self.kalman.values() {
            kalman.validate().map_err(|_| StateError::InvalidKalmanVariance(kalman.error_variance))?;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, StateError> {
        let state: Self = serde_json::from_reader(File::open(path)?)?;
        state.validate()?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }
}

/// Process-wide per-station fusion calibration (§4.6 "multi-broadcast
/// fusion"), persisted separately from any one channel's state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionState {
    pub schema_version: u32,
    pub calibration: HashMap<Station, analytics::clock_offset::StationCalibration>,
}

impl FusionState {
    pub fn validate(&self) -> Result<(), StateError> {
        if self.schema_version != STATE_SCHEMA_VERSION {
            return Err(StateError::SchemaMismatch {
                found: self.schema_version,
                expected: STATE_SCHEMA_VERSION,
            });
        }
        for calibration in self.calibration.values() {
            if !(0.0..=1.0).contains(&calibration.confidence) {
                return Err(StateError::ConfidenceOutOfRange(calibration.confidence));
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, StateError> {
        let state: Self = serde_json::from_reader(File::open(path)?)?;
        state.validate()?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }
}

pub fn channel_state_path(state_dir: &Path, channel_key: &str) -> PathBuf {
    state_dir.join(format!("{channel_key}.timesnap.json"))
}

pub fn fusion_state_path(state_dir: &Path) -> PathBuf {
    state_dir.join("fusion.json")
}

/// Removes a channel's persisted state so it restarts acquisition from
/// scratch (`reset-state` CLI subcommand, §6).
pub fn reset_channel_state(state_dir: &Path, channel_key: &str) -> Result<(), StateError> {
    let path = channel_state_path(state_dir, channel_key);
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

//! Per-channel Welford running statistics feeding a 1-state Kalman filter,
//! and the ACQUIRING -> CONVERGING -> LOCKED -> REACQUIRE convergence state
//! machine (§4.6).

use codec::discrimination::ConvergenceState;
use serde::{Deserialize, Serialize};

/// Welford's online mean/variance algorithm, numerically stable without
/// storing the full sample history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Welford {
    pub count: u64,
    pub mean: f64,
    m2: f64,
}

impl Default for Welford {
    fn default() -> Self {
        Self { count: 0, mean: 0.0, m2: 0.0 }
    }
}

impl Welford {
    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            f64::INFINITY
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Standard error of the mean, `sigma / sqrt(N)`.
    pub fn standard_error(&self) -> f64 {
        if self.count == 0 {
            f64::INFINITY
        } else {
            self.std_dev() / (self.count as f64).sqrt()
        }
    }
}

/// A 1-state Kalman filter tracking a scalar (here: `D_clock` in
/// milliseconds) whose true value drifts slowly, with measurement noise
/// estimated from the Welford accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KalmanState {
    pub estimate: f64,
    pub error_variance: f64,
    /// Process noise: how much the true offset is expected to drift between
    /// measurements. Small relative to a typical OCXO/TCXO drift rate.
    pub process_variance: f64,
    pub stats: Welford,
    pub state: ConvergenceState,
    pub anomaly_streak: u32,
    pub schema_version: u32,
}

pub const KALMAN_SCHEMA_VERSION: u32 = 1;

impl Default for KalmanState {
    fn default() -> Self {
        Self {
            estimate: 0.0,
            error_variance: 1.0e6,
            process_variance: 1.0e-3,
            stats: Welford::default(),
            state: ConvergenceState::Acquiring,
            anomaly_streak: 0,
            schema_version: KALMAN_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KalmanStateError {
    #[error("unsupported schema version {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("error_variance must be positive, got {0}")]
    InvalidVariance(f64),
}

impl KalmanState {
    /// Validates a state loaded from disk per §4.6/§7: range-checked,
    /// version-tagged, rejected (not patched) on corruption.
    pub fn validate(&self) -> Result<(), KalmanStateError> {
        if self.schema_version != KALMAN_SCHEMA_VERSION {
            return Err(KalmanStateError::SchemaMismatch {
                found: self.schema_version,
                expected: KALMAN_SCHEMA_VERSION,
            });
        }
        if !(self.error_variance > 0.0) || !self.error_variance.is_finite() {
            return Err(KalmanStateError::InvalidVariance(self.error_variance));
        }
        Ok(())
    }

    /// Feeds one `D_clock` measurement (ms) into the filter. Returns the
    /// updated estimate, its uncertainty (ms), and the measurement's
    /// residual in sigmas, `None` residual for the very first measurement.
    ///
    /// Per §4.6/§7: measurements whose residual exceeds 5 sigma are
    /// rejected from the estimate but still counted toward the anomaly
    /// streak that can trigger REACQUIRE.
    pub fn update(&mut self, measurement_ms: f64) -> KalmanUpdate {
        self.stats.update(measurement_ms);

        let prior_estimate = self.estimate;
        let prior_variance = self.error_variance + self.process_variance;

        let measurement_variance = self.stats.variance().max(1e-6);
        let residual = measurement_ms - prior_estimate;
        let sigma = (prior_variance + measurement_variance).sqrt();
        let residual_sigmas = if self.stats.count <= 1 { 0.0 } else { residual.abs() / sigma };

        let rejected = self.stats.count > 1 && residual_sigmas > 5.0;

        if !rejected {
            let gain = prior_variance / (prior_variance + measurement_variance);
            self.estimate = prior_estimate + gain * residual;
            self.error_variance = (1.0 - gain) * prior_variance;
        }

        if self.stats.count > 1 && residual_sigmas > 3.0 {
            self.anomaly_streak += 1;
        } else {
            self.anomaly_streak = 0;
        }

        self.advance_state();

        KalmanUpdate {
            estimate_ms: self.estimate,
            uncertainty_ms: self.error_variance.sqrt(),
            residual_sigmas,
            rejected,
            state: self.state,
        }
    }

    fn advance_state(&mut self) {
        self.state = match self.state {
            ConvergenceState::Acquiring if self.stats.count >= 10 => ConvergenceState::Converging,
            ConvergenceState::Converging
                if self.stats.standard_error() < 1.0 && self.stats.count >= 30 =>
            {
                ConvergenceState::Locked
            }
            ConvergenceState::Locked if self.anomaly_streak >= 5 => {
                self.stats = Welford::default();
                self.anomaly_streak = 0;
                ConvergenceState::Reacquire
            }
            ConvergenceState::Reacquire if self.stats.count >= 10 => ConvergenceState::Converging,
            other => other,
        };
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KalmanUpdate {
    pub estimate_ms: f64,
    pub uncertainty_ms: f64,
    pub residual_sigmas: f64,
    pub rejected: bool,
    pub state: ConvergenceState,
}

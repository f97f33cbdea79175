//! Complex baseband decimation (§2 step "Resample the I/Q to a low-rate band
//! containing the tone", §4.4 step 1).
//!
//! `rubato` (used by the `songbird` audio pipeline for real-valued sample
//! rate conversion) doesn't have a convenient complex-I/Q two-channel mode
//! for this use case, so decimation here is a small hand-rolled windowed-sinc
//! FIR low-pass followed by downsampling, the standard DSP-101 approach and
//! cheap enough at these rates (tens of kHz, tone bands of a few kHz) to not
//! need an FFT-based polyphase filter.

use codec::rtp::Complex;

/// A fixed low-pass FIR filter plus integer decimation factor.
pub struct Decimator {
    taps: Vec<f64>,
    factor: usize,
}

impl Decimator {
    /// Builds a decimator from `input_rate` down to approximately
    /// `target_rate`, with a Hamming-windowed sinc low-pass cut at
    /// `target_rate / 2`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsig_recorder_dsp::resample::Decimator;
    ///
    /// let dec = Decimator::new(20_000, 3_000);
    /// assert_eq!(dec.factor(), 6);
    /// ```
    pub fn new(input_rate: u32, target_rate: u32) -> Self {
        let factor = (input_rate / target_rate).max(1) as usize;
        let cutoff = 1.0 / factor as f64; // normalized to input Nyquist
        let num_taps = (factor * 8 + 1).max(9) | 1; // odd length, symmetric
        let taps = windowed_sinc_lowpass(num_taps, cutoff);

        Self { taps, factor }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn output_rate(&self, input_rate: u32) -> u32 {
        (input_rate as usize / self.factor) as u32
    }

    /// Filters then decimates. Output length is `input.len() / factor`
    /// (rounded down); the filter group delay is not compensated for since
    /// callers only need relative timing within the decimated stream for
    /// peak search, then translate back to input-rate sample indices.
    pub fn process(&self, input: &[Complex]) -> Vec<Complex> {
        let n = self.taps.len();
        let half = n / 2;
        let mut out = Vec::with_capacity(input.len() / self.factor + 1);

        let mut i = 0;
        while i < input.len() {
            let mut acc = Complex::ZERO;
            for (k, tap) in self.taps.iter().enumerate() {
                let idx = i as isize + k as isize - half as isize;
                if idx >= 0 && (idx as usize) < input.len() {
                    acc = acc + input[idx as usize] * *tap;
                }
            }
            out.push(acc);
            i += self.factor;
        }

        out
    }
}

fn windowed_sinc_lowpass(num_taps: usize, cutoff: f64) -> Vec<f64> {
    let m = (num_taps - 1) as f64;
    let mut taps = Vec::with_capacity(num_taps);
    let mut sum = 0.0;

    for n in 0..num_taps {
        let x = n as f64 - m / 2.0;
        let sinc = if x == 0.0 {
            2.0 * cutoff
        } else {
            (2.0 * std::f64::consts::PI * cutoff * x).sin() / (std::f64::consts::PI * x)
        };

        // Hamming window.
        let w = 0.54 - 0.46 * (2.0 * std::f64::consts::PI * n as f64 / m).cos();
        let tap = sinc * w;
        taps.push(tap);
        sum += tap;
    }

    // Normalize to unity DC gain.
    if sum.abs() > 1e-12 {
        for t in taps.iter_mut() {
            *t /= sum;
        }
    }

    taps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimates_by_expected_factor() {
        let dec = Decimator::new(20_000, 3_000);
        assert_eq!(dec.factor(), 6);
        assert_eq!(dec.output_rate(20_000), 3_333);
    }

    #[test]
    fn passes_dc_through() {
        let dec = Decimator::new(20_000, 2_000);
        let input = vec![Complex::new(1.0, 0.0); 2_000];
        let out = dec.process(&input);

        // Steady-state (away from the filter's startup transient) should
        // settle near unity gain for a DC input.
        let steady = &out[out.len() / 2..];
        let avg: f64 = steady.iter().map(|c| c.re).sum::<f64>() / steady.len() as f64;
        assert!((avg - 1.0).abs() < 0.05, "avg={avg}");
    }
}

//! One-sided spectral transforms for real receive blocks
//!
//! The conditioning pipeline works on real input, so only the bins from DC
//! through Nyquist carry information (Hermitian symmetry). This module wraps
//! `rustfft` with that convention: the forward transform of an `N`-sample
//! block fills bins `0..=N/2` and clears everything above, and the inverse
//! transform consumes the one-sided spectrum directly. The conjugate half is
//! never materialized, which makes the inverse output the half-amplitude
//! analytic-style reconstruction of the input.
//!
//! ```text
//!  real block ──forward──> [DC ... Nyquist | 0 0 0 ... 0] ──inverse──> complex block
//!                           bins 0..=N/2     cleared
//! ```
//!
//! `SpectrumPlan` holds the FFT instances for one block size and is shared
//! read-only across worker threads; each worker owns a `SpectrumScratch`.
//!
//! ## Example
//!
//! ```rust
//! use usprep_core::spectrum::SpectrumPlan;
//! use usprep_core::types::Complex;
//!
//! let plan = SpectrumPlan::new(8);
//! let mut scratch = plan.make_scratch().unwrap();
//! let input = [1.0, 0.0, -1.0, 0.0, 1.0, 0.0, -1.0, 0.0];
//! let mut spectrum = vec![Complex::new(0.0, 0.0); 8];
//! plan.forward_one_sided(&input, &mut spectrum, &mut scratch);
//!
//! // A tone at a quarter of the sampling rate lands in bin 2; the mirror
//! // bin above Nyquist is cleared.
//! assert!(spectrum[2].norm() > 3.9);
//! assert_eq!(spectrum[6].norm(), 0.0);
//! ```

use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

use crate::types::{try_alloc, PrepResult, Sample};

/// Forward/inverse FFT pair for one block size
pub struct SpectrumPlan {
    /// Transform block size in samples
    size: usize,
    /// Forward FFT instance
    forward: Arc<dyn Fft<f64>>,
    /// Inverse FFT instance
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for SpectrumPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumPlan")
            .field("size", &self.size)
            .finish()
    }
}

impl SpectrumPlan {
    /// Plan forward and inverse transforms for `size`-sample blocks
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);

        Self {
            size,
            forward,
            inverse,
        }
    }

    /// Transform block size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of one-sided bins a filter response covers (DC inclusive,
    /// Nyquist exclusive)
    pub fn one_sided_len(&self) -> usize {
        self.size / 2
    }

    /// Allocate a workspace sized for both transform directions
    pub fn make_scratch(&self) -> PrepResult<SpectrumScratch> {
        let len = self
            .forward
            .get_inplace_scratch_len()
            .max(self.inverse.get_outofplace_scratch_len());
        Ok(SpectrumScratch {
            scratch: try_alloc(len, "transform scratch")?,
        })
    }

    /// Forward transform of a real block into its one-sided spectrum.
    ///
    /// `spectrum` receives `size` bins: `0..=size/2` carry the spectrum and
    /// the bins above Nyquist are cleared, so a reused buffer never leaks a
    /// previous block into the inverse transform.
    pub fn forward_one_sided(
        &self,
        input: &[Sample],
        spectrum: &mut [Complex64],
        scratch: &mut SpectrumScratch,
    ) {
        debug_assert_eq!(input.len(), self.size);
        debug_assert_eq!(spectrum.len(), self.size);

        for (bin, &sample) in spectrum.iter_mut().zip(input) {
            *bin = Complex64::new(sample, 0.0);
        }
        self.forward
            .process_with_scratch(spectrum, &mut scratch.scratch);
        for bin in spectrum.iter_mut().skip(self.size / 2 + 1) {
            *bin = Complex64::new(0.0, 0.0);
        }
    }

    /// Unnormalized inverse transform of `spectrum` into `output`.
    ///
    /// `spectrum` is clobbered by the transform. Callers apply the `1/size`
    /// normalization themselves, once per block group.
    pub fn inverse_into(
        &self,
        spectrum: &mut [Complex64],
        output: &mut [Complex64],
        scratch: &mut SpectrumScratch,
    ) {
        debug_assert_eq!(spectrum.len(), self.size);
        debug_assert_eq!(output.len(), self.size);

        self.inverse
            .process_outofplace_with_scratch(spectrum, output, &mut scratch.scratch);
    }
}

/// Per-worker transform workspace
pub struct SpectrumScratch {
    scratch: Vec<Complex64>,
}

/// Index of the sample with the greatest squared magnitude.
///
/// The first maximum wins when magnitudes tie.
pub fn peak_index(samples: &[Complex64]) -> usize {
    let mut max_index = 0;
    let mut max_power = 0.0;

    for (i, sample) in samples.iter().enumerate() {
        let power = sample.norm_sqr();
        if power > max_power {
            max_power = power;
            max_index = i;
        }
    }

    max_index
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_forward_one_sided_tone() {
        let n = 128;
        let plan = SpectrumPlan::new(n);
        let mut scratch = plan.make_scratch().unwrap();

        let input: Vec<f64> = (0..n)
            .map(|s| (2.0 * PI * 10.0 * s as f64 / n as f64).cos())
            .collect();
        let mut spectrum = vec![Complex64::default(); n];
        plan.forward_one_sided(&input, &mut spectrum, &mut scratch);

        // A unit cosine puts half its energy in the positive-frequency bin
        assert_relative_eq!(spectrum[10].norm(), n as f64 / 2.0, epsilon = 1e-9);
        for bin in &spectrum[n / 2 + 1..] {
            assert_eq!(bin.norm(), 0.0);
        }
    }

    #[test]
    fn test_one_sided_round_trip_real_part() {
        let n = 64;
        let plan = SpectrumPlan::new(n);
        let mut scratch = plan.make_scratch().unwrap();

        let input: Vec<f64> = (0..n)
            .map(|s| (2.0 * PI * 3.0 * s as f64 / n as f64).sin())
            .collect();
        let mut spectrum = vec![Complex64::default(); n];
        let mut output = vec![Complex64::default(); n];
        plan.forward_one_sided(&input, &mut spectrum, &mut scratch);
        plan.inverse_into(&mut spectrum, &mut output, &mut scratch);

        // The one-sided inverse halves the signal; twice the real part
        // recovers a zero-mean, Nyquist-free input
        for (out, &sample) in output.iter().zip(&input) {
            assert_relative_eq!(2.0 * out.re / n as f64, sample, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_reused_spectrum_buffer_is_cleared() {
        let n = 16;
        let plan = SpectrumPlan::new(n);
        let mut scratch = plan.make_scratch().unwrap();

        let mut spectrum = vec![Complex64::new(7.0, -3.0); n];
        let input = vec![0.0; n];
        plan.forward_one_sided(&input, &mut spectrum, &mut scratch);

        assert!(spectrum.iter().all(|bin| bin.norm() == 0.0));
    }

    #[test]
    fn test_peak_index_prefers_first_of_equal_peaks() {
        let samples = vec![
            Complex64::new(1.0, 0.0),
            Complex64::new(0.0, 3.0),
            Complex64::new(3.0, 0.0),
            Complex64::new(-2.0, 0.0),
        ];
        assert_eq!(peak_index(&samples), 1);
    }

    #[test]
    fn test_peak_index_of_silence_is_zero() {
        let samples = vec![Complex64::default(); 8];
        assert_eq!(peak_index(&samples), 0);
    }
}

//! Receive-filter synthesis
//!
//! Builds the composite transfer function applied to every receive channel
//! before decoding: an optional windowed-sinc low-pass, an optional matched
//! filter for the transmit pulse, and an optional analytic-signal conversion.
//! All stages compose by element-wise multiplication over the one-sided
//! spectrum, so their order only matters for the accumulated time offset.
//!
//! Each enabled stage delays the signal; the design reports the total as
//! `time_offset` in seconds so callers can fold it into the acquisition
//! timestamp before beamforming.
//!
//! ## Example
//!
//! ```rust
//! use usprep_core::filter_design::{FilterSpec, ReceiveFilter};
//!
//! let spec = FilterSpec {
//!     sample_count: 1024,
//!     sampling_frequency: 40e6,
//!     transmit_frequency: 5e6,
//!     center_frequency: 5e6,
//!     low_pass_cutoff: 8e6,
//!     low_pass_order: 65,
//!     analytic: true,
//! };
//! let filter = ReceiveFilter::design(&spec).unwrap();
//! assert_eq!(filter.response().len(), 512);
//! assert!(filter.time_offset() > 0.0);
//! ```

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::spectrum::{peak_index, SpectrumPlan, SpectrumScratch};
use crate::types::{try_alloc, PrepResult, Sample};

/// Parameters describing the receive conditioning filter for one frame shape.
///
/// Stages are enabled by their parameters: a zero `low_pass_cutoff` disables
/// the low-pass stage and a zero `transmit_frequency` disables the matched
/// filter. The transforms assume an even `sample_count`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Samples per transmit event in each channel (transform block size)
    pub sample_count: usize,
    /// Acquisition sampling frequency in Hz
    pub sampling_frequency: f64,
    /// Transmit pulse frequency in Hz; 0 disables the matched-filter stage
    pub transmit_frequency: f64,
    /// Transducer center frequency in Hz, used by the matched-filter stage
    pub center_frequency: f64,
    /// Low-pass cutoff in Hz; 0 disables the low-pass stage
    pub low_pass_cutoff: f64,
    /// Low-pass kernel length in taps, symmetric about `(order - 1) / 2`
    pub low_pass_order: usize,
    /// Convert the output to its analytic signal (doubled interior bins)
    pub analytic: bool,
}

impl FilterSpec {
    /// Flat spec with every stage disabled
    pub fn new(sample_count: usize, sampling_frequency: f64) -> Self {
        Self {
            sample_count,
            sampling_frequency,
            transmit_frequency: 0.0,
            center_frequency: 0.0,
            low_pass_cutoff: 0.0,
            low_pass_order: 0,
            analytic: false,
        }
    }

    /// Whether the low-pass stage participates
    pub fn has_low_pass(&self) -> bool {
        self.low_pass_cutoff > 0.0
    }

    /// Whether the matched-filter stage participates
    pub fn has_matched_filter(&self) -> bool {
        self.transmit_frequency > 0.0
    }
}

/// Composite one-sided frequency response plus its group-delay compensation.
///
/// `response` holds `sample_count / 2` bins, DC inclusive and Nyquist
/// exclusive; the conjugate-symmetric upper half is implied and never
/// stored. A designed filter is immutable and is shared read-only across
/// the worker pool for the lifetime of a frame.
#[derive(Debug, Clone)]
pub struct ReceiveFilter {
    response: Vec<Complex64>,
    time_offset: f64,
}

impl ReceiveFilter {
    /// Design the composite filter for `spec`.
    ///
    /// Allocation failure of the response or any stage scratch buffer aborts
    /// the design with [`crate::types::PrepError::Allocation`].
    pub fn design(spec: &FilterSpec) -> PrepResult<Self> {
        let half = spec.sample_count / 2;
        let mut response = try_alloc::<Complex64>(half, "filter response")?;

        // Flat pass-through; interior bins double when the output is the
        // analytic signal, DC and the top bin stay at unit gain.
        let interior = if spec.analytic { 2.0 } else { 1.0 };
        if half > 0 {
            response[0] = Complex64::new(1.0, 0.0);
        }
        for bin in response.iter_mut().take(half.saturating_sub(1)).skip(1) {
            *bin = Complex64::new(interior, 0.0);
        }
        if half > 1 {
            response[half - 1] = Complex64::new(1.0, 0.0);
        }

        let mut time_offset = 0.0;
        if spec.has_low_pass() || spec.has_matched_filter() {
            let plan = SpectrumPlan::new(spec.sample_count);
            let mut scratch = plan.make_scratch()?;
            let mut kernel = try_alloc::<Sample>(spec.sample_count, "design kernel")?;
            let mut spectrum = try_alloc::<Complex64>(spec.sample_count, "design spectrum")?;

            if spec.has_low_pass() {
                time_offset += low_pass_stage(
                    spec,
                    &plan,
                    &mut scratch,
                    &mut kernel,
                    &mut spectrum,
                    &mut response,
                );
            }
            if spec.has_matched_filter() {
                time_offset += matched_stage(
                    spec,
                    &plan,
                    &mut scratch,
                    &mut kernel,
                    &mut spectrum,
                    &mut response,
                )?;
            }
        }

        debug!(
            sample_count = spec.sample_count,
            low_pass = spec.has_low_pass(),
            matched = spec.has_matched_filter(),
            analytic = spec.analytic,
            time_offset_s = time_offset,
            "designed receive filter"
        );

        Ok(Self {
            response,
            time_offset,
        })
    }

    /// One-sided frequency response, `sample_count / 2` bins
    pub fn response(&self) -> &[Complex64] {
        &self.response
    }

    /// Accumulated stage delay in seconds; add it to the acquisition time
    /// offset before beamforming
    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    /// Multiply the filter into the lower one-sided bins of `spectrum`.
    ///
    /// Bins at and above Nyquist are left untouched.
    pub fn apply_to(&self, spectrum: &mut [Complex64]) {
        for (bin, weight) in spectrum.iter_mut().zip(&self.response) {
            *bin *= *weight;
        }
    }
}

/// Multiply `weights` element-wise into `response`, stopping at the shorter
fn multiply_into(response: &mut [Complex64], weights: &[Complex64]) {
    for (bin, weight) in response.iter_mut().zip(weights) {
        *bin *= *weight;
    }
}

/// Windowed-sinc low-pass kernel (Hann window) written into the front of
/// `kernel`, with the rest of the block zeroed for the transform
fn low_pass_kernel(kernel: &mut [Sample], order: usize, cutoff: f64, sampling_frequency: f64) {
    kernel.fill(0.0);
    let wc = 2.0 * PI * cutoff / sampling_frequency;
    let mid = order.saturating_sub(1) / 2;
    for (i, tap) in kernel.iter_mut().enumerate().take(order) {
        let k = i as f64 - mid as f64;
        let sinc = if i == mid {
            wc / PI
        } else {
            (wc * k).sin() / (PI * k)
        };
        let window = 0.5 - 0.5 * (2.0 * PI * i as f64 / (order - 1) as f64).cos();
        *tap = sinc * window;
    }
}

fn low_pass_stage(
    spec: &FilterSpec,
    plan: &SpectrumPlan,
    scratch: &mut SpectrumScratch,
    kernel: &mut [Sample],
    spectrum: &mut [Complex64],
    response: &mut [Complex64],
) -> f64 {
    low_pass_kernel(
        kernel,
        spec.low_pass_order,
        spec.low_pass_cutoff,
        spec.sampling_frequency,
    );
    plan.forward_one_sided(kernel, spectrum, scratch);
    multiply_into(response, spectrum);

    // Approximate group delay; known to drift for larger kernel orders
    (spec.low_pass_order as f64 - 1.0) / (4.0 * PI * spec.low_pass_cutoff)
}

fn matched_stage(
    spec: &FilterSpec,
    plan: &SpectrumPlan,
    scratch: &mut SpectrumScratch,
    kernel: &mut [Sample],
    spectrum: &mut [Complex64],
    response: &mut [Complex64],
) -> PrepResult<f64> {
    let half = spec.sample_count / 2;
    let fs = spec.sampling_frequency;

    let mut pulse = try_alloc::<Complex64>(spec.sample_count, "pulse spectrum")?;
    let mut correlation = try_alloc::<Complex64>(spec.sample_count, "pulse correlation")?;

    // Impulse response model: one cycle at the transducer center frequency,
    // Hann windowed
    kernel.fill(0.0);
    let length = ((fs / spec.center_frequency) as usize).saturating_add(1);
    let wc = 2.0 * PI * spec.center_frequency / fs;
    for (i, tap) in kernel.iter_mut().enumerate().take(length) {
        let window = 0.5 - 0.5 * (2.0 * PI * i as f64 / (length - 1) as f64).cos();
        *tap = (wc * i as f64).sin() * window;
    }
    plan.forward_one_sided(kernel, &mut pulse, scratch);
    multiply_into(response, &pulse);

    // Transmit waveform: two unwindowed cycles at the transmit frequency
    kernel.fill(0.0);
    let length = ((2.0 * (fs / spec.transmit_frequency)) as usize).saturating_add(1);
    let wc = 2.0 * PI * spec.transmit_frequency / fs;
    for (i, tap) in kernel.iter_mut().enumerate().take(length) {
        *tap = (wc * i as f64).sin();
    }
    plan.forward_one_sided(kernel, spectrum, scratch);
    multiply_into(response, spectrum);

    // The pulse autocorrelation locates the matched-filter delay. Interior
    // one-sided bins double so the inverse sees the full Hermitian energy.
    for (bin, weight) in pulse.iter_mut().zip(spectrum.iter()).take(half) {
        *bin *= *weight;
    }
    for bin in pulse.iter_mut().take(half.saturating_sub(1)).skip(1) {
        *bin *= 2.0;
    }
    plan.inverse_into(&mut pulse, &mut correlation, scratch);
    let peak = peak_index(&correlation[..half]);

    Ok(peak as f64 / fs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_spec_is_identity_response() {
        let filter = ReceiveFilter::design(&FilterSpec::new(16, 40e6)).unwrap();
        assert_eq!(filter.response().len(), 8);
        assert_eq!(filter.time_offset(), 0.0);
        for bin in filter.response() {
            assert_eq!(*bin, Complex64::new(1.0, 0.0));
        }
    }

    #[test]
    fn test_analytic_doubles_interior_bins() {
        let mut spec = FilterSpec::new(16, 40e6);
        spec.analytic = true;
        let filter = ReceiveFilter::design(&spec).unwrap();

        let response = filter.response();
        assert_eq!(response[0], Complex64::new(1.0, 0.0));
        assert_eq!(response[7], Complex64::new(1.0, 0.0));
        for bin in &response[1..7] {
            assert_eq!(*bin, Complex64::new(2.0, 0.0));
        }
    }

    #[test]
    fn test_low_pass_kernel_is_symmetric() {
        let order = 65;
        let mut kernel = vec![0.0; 128];
        low_pass_kernel(&mut kernel, order, 5e6, 40e6);

        for i in 0..order {
            assert_relative_eq!(kernel[i], kernel[order - 1 - i], epsilon = 1e-12);
        }
        // Zero padding beyond the taps
        assert!(kernel[order..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_low_pass_response_attenuates_stopband() {
        let spec = FilterSpec {
            sample_count: 1024,
            sampling_frequency: 40e6,
            transmit_frequency: 0.0,
            center_frequency: 0.0,
            low_pass_cutoff: 5e6,
            low_pass_order: 65,
            analytic: false,
        };
        let filter = ReceiveFilter::design(&spec).unwrap();

        // Bin 51 sits near 2 MHz, bin 256 at 10 MHz
        let passband = filter.response()[51].norm();
        let stopband = filter.response()[256].norm();
        assert!(passband > 0.9, "passband gain {passband}");
        assert!(stopband < 0.01 * passband, "stopband gain {stopband}");

        assert_relative_eq!(
            filter.time_offset(),
            64.0 / (4.0 * PI * 5e6),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_matched_filter_locates_pulse_delay() {
        let n = 1024;
        let fs = 40e6;
        let spec = FilterSpec {
            sample_count: n,
            sampling_frequency: fs,
            transmit_frequency: 5e6,
            center_frequency: 5e6,
            low_pass_cutoff: 0.0,
            low_pass_order: 0,
            analytic: false,
        };
        let filter = ReceiveFilter::design(&spec).unwrap();

        // The pulse pair spans 9 + 17 taps, so the reported delay stays well
        // inside the first fraction of the block
        let delay_samples = filter.time_offset() * fs;
        assert!(
            delay_samples > 0.0 && delay_samples < 32.0,
            "delay {delay_samples} samples"
        );

        // A unit impulse through the filter concentrates at the reported delay
        let plan = SpectrumPlan::new(n);
        let mut scratch = plan.make_scratch().unwrap();
        let mut impulse = vec![0.0; n];
        impulse[0] = 1.0;
        let mut spectrum = vec![Complex64::default(); n];
        let mut output = vec![Complex64::default(); n];
        plan.forward_one_sided(&impulse, &mut spectrum, &mut scratch);
        filter.apply_to(&mut spectrum);
        plan.inverse_into(&mut spectrum, &mut output, &mut scratch);

        let peak = peak_index(&output[..n / 2]);
        assert!(
            (peak as f64 - delay_samples).abs() <= 1.5,
            "impulse peak at {peak}, reported delay {delay_samples:.2}"
        );

        // Energy concentrates around the pulse band, 5 MHz = bin 128
        let in_band = filter.response()[128].norm();
        let out_of_band = filter.response()[480].norm();
        assert!(in_band > 100.0 * out_of_band);
    }

    #[test]
    fn test_stage_offsets_accumulate() {
        let n = 1024;
        let fs = 40e6;
        let mut spec = FilterSpec {
            sample_count: n,
            sampling_frequency: fs,
            transmit_frequency: 5e6,
            center_frequency: 5e6,
            low_pass_cutoff: 8e6,
            low_pass_order: 33,
            analytic: false,
        };
        let both = ReceiveFilter::design(&spec).unwrap();

        spec.transmit_frequency = 0.0;
        let low_pass_only = ReceiveFilter::design(&spec).unwrap();

        spec.transmit_frequency = 5e6;
        spec.low_pass_cutoff = 0.0;
        let matched_only = ReceiveFilter::design(&spec).unwrap();

        assert_relative_eq!(
            both.time_offset(),
            low_pass_only.time_offset() + matched_only.time_offset(),
            epsilon = 1e-12
        );
    }
}

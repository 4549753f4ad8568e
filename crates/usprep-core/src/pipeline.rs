//! # Parallel frame conditioning
//!
//! Applies one [`ReceiveFilter`] to every channel of a raw receive frame:
//! convert the channel's signed 16-bit samples to the working type, forward
//! transform each transmit block, multiply the one-sided response in,
//! inverse transform, and scale. Without a filter the pipeline degrades to a
//! straight conversion pass.
//!
//! Channels are independent, so the pipeline parallelizes across them with a
//! fixed pool of scoped worker threads plus the calling thread. Workers
//! claim channels from a shared atomic counter and exit once it passes the
//! channel count; the scope join is the only synchronization point.
//!
//! ```text
//!             ┌── worker 0 ──> claim, claim, ...
//!  counter ───┼── worker 1 ──> claim, ...
//!             └── caller   ──> claim, claim, ...
//!
//!  channel c: i16 ─> f64 ─> FFT ─> × response ─> IFFT ─> × 1/N
//! ```
//!
//! ## Example
//!
//! ```rust
//! use usprep_core::pipeline::{ChannelLayout, TransformBuffers, TransformPipeline};
//!
//! let layout = ChannelLayout::contiguous(8, 2, 1);
//! let raw: Vec<i16> = (0..layout.required_elements() as i16).collect();
//! let mut buffers = TransformBuffers::for_layout(&layout).unwrap();
//!
//! // No filter: channels are converted to the working type untouched
//! TransformPipeline::new(0)
//!     .process(None, &layout, &raw, &mut buffers)
//!     .unwrap();
//! assert_eq!(buffers.ifft[3].re, 3.0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filter_design::ReceiveFilter;
use crate::spectrum::{SpectrumPlan, SpectrumScratch};
use crate::types::{try_alloc, PrepError, PrepResult, Sample};

/// Ordering of transmit events in the raw capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmitLayout {
    /// Transmit events indexed by receive row
    Rows,
    /// Transmit events indexed by receive column
    Columns,
}

/// Shape of one receive frame in the flattened acquisition buffer.
///
/// Samples vary fastest, then transmit events, then channels: element
/// `(c, t, s)` lives at `c * channel_stride + t * sample_count + s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    /// Samples per transmit event (transform block size)
    pub sample_count: usize,
    /// Channels to condition
    pub channel_count: usize,
    /// Transmit events per channel
    pub transmit_count: usize,
    /// Elements between consecutive channels, at least
    /// `sample_count * transmit_count`
    pub channel_stride: usize,
    /// Channels skipped at the front of the buffer before the conditioned
    /// range
    pub channel_offset: usize,
}

impl ChannelLayout {
    /// Densely packed layout with no skipped channels
    pub fn contiguous(sample_count: usize, channel_count: usize, transmit_count: usize) -> Self {
        Self {
            sample_count,
            channel_count,
            transmit_count,
            channel_stride: sample_count * transmit_count,
            channel_offset: 0,
        }
    }

    /// Layout for a capture whose raw channel range can lead with channels
    /// the decode stage drops. Row transmit ordering places the decoded
    /// channels after the dropped ones, so the conditioned range starts at
    /// `channel_count` whenever the raw capture carries extra channels.
    pub fn for_transmit_mode(
        sample_count: usize,
        channel_count: usize,
        transmit_count: usize,
        raw_channel_count: usize,
        transmit_layout: TransmitLayout,
    ) -> Self {
        let channel_offset = match transmit_layout {
            TransmitLayout::Rows if raw_channel_count != channel_count => channel_count,
            _ => 0,
        };
        Self {
            sample_count,
            channel_count,
            transmit_count,
            channel_stride: sample_count * transmit_count,
            channel_offset,
        }
    }

    /// Total elements the frame buffers must hold.
    ///
    /// Saturates on overflow, which no real buffer can satisfy.
    pub fn required_elements(&self) -> usize {
        self.channel_count
            .saturating_add(self.channel_offset)
            .checked_mul(self.channel_stride)
            .unwrap_or(usize::MAX)
    }

    /// Check the stride and shape invariants
    pub fn validate(&self) -> PrepResult<()> {
        if self.sample_count == 0 {
            return Err(PrepError::InvalidLayout(
                "sample_count must be nonzero".into(),
            ));
        }
        if self.channel_stride < self.sample_count * self.transmit_count {
            return Err(PrepError::InvalidLayout(format!(
                "channel_stride {} shorter than {} samples x {} transmits",
                self.channel_stride, self.sample_count, self.transmit_count
            )));
        }
        Ok(())
    }
}

/// Frame-scoped working storage for the pipeline.
///
/// All three buffers hold `required_elements()` entries: `input` receives
/// the converted samples, `fft` the forward spectra, and `ifft` the
/// conditioned output handed downstream.
#[derive(Debug, Clone)]
pub struct TransformBuffers {
    /// Converted working-type samples
    pub input: Vec<Sample>,
    /// Forward transform scratch, one-sided spectra per transmit block
    pub fft: Vec<Complex64>,
    /// Conditioned output
    pub ifft: Vec<Complex64>,
}

impl TransformBuffers {
    /// Allocate zeroed buffers sized for `layout`
    pub fn for_layout(layout: &ChannelLayout) -> PrepResult<Self> {
        layout.validate()?;
        let len = layout.required_elements();
        Ok(Self {
            input: try_alloc(len, "frame input")?,
            fft: try_alloc(len, "forward spectra")?,
            ifft: try_alloc(len, "conditioned output")?,
        })
    }
}

/// Shared view of the frame buffers handed to the worker pool.
///
/// Each claimed channel maps to a disjoint `stride`-long range of every
/// buffer, so workers never alias as long as the claim counter hands out
/// each channel exactly once.
struct FrameBuffers {
    input: *mut Sample,
    fft: *mut Complex64,
    ifft: *mut Complex64,
    stride: usize,
}

// Safety: workers only touch the disjoint per-channel ranges handed out by
// the claim counter, and the pointers outlive the thread scope because the
// caller holds the buffers across it
unsafe impl Sync for FrameBuffers {}

impl FrameBuffers {
    /// Mutable views of one channel's range in each buffer.
    ///
    /// # Safety
    ///
    /// `channel` must be claimed by exactly one worker for the lifetime of
    /// the returned slices, and `(channel + 1) * stride` must be within
    /// every buffer.
    unsafe fn channel(&self, channel: usize) -> (&mut [Sample], &mut [Complex64], &mut [Complex64]) {
        let offset = channel * self.stride;
        (
            std::slice::from_raw_parts_mut(self.input.add(offset), self.stride),
            std::slice::from_raw_parts_mut(self.fft.add(offset), self.stride),
            std::slice::from_raw_parts_mut(self.ifft.add(offset), self.stride),
        )
    }
}

/// Everything a worker needs for one frame
#[derive(Clone, Copy)]
struct WorkerContext<'a> {
    frame: &'a FrameBuffers,
    raw: &'a [i16],
    filter: Option<&'a ReceiveFilter>,
    layout: &'a ChannelLayout,
    plan: &'a SpectrumPlan,
    next_channel: &'a AtomicUsize,
}

/// Fixed worker pool applying one filter across every channel of a frame
#[derive(Debug, Clone, Copy)]
pub struct TransformPipeline {
    workers: usize,
}

impl TransformPipeline {
    /// Pool with `workers` extra threads. The calling thread always
    /// participates, so zero runs the whole frame on the caller.
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    /// Number of extra worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Condition one frame of raw receive data into `buffers.ifft`.
    ///
    /// With a filter, every transmit block of every channel in
    /// `[channel_offset, channel_offset + channel_count)` is transformed,
    /// multiplied by the one-sided response, inverse transformed, and scaled
    /// by `1 / sample_count`. Without one, the channels are converted to
    /// complex working samples untouched. Channels below `channel_offset`
    /// are never written.
    ///
    /// Scratch allocation happens before the first channel is claimed, so an
    /// allocation failure aborts the frame with nothing half-processed.
    /// Undersized buffers are a programmer error and panic.
    pub fn process(
        &self,
        filter: Option<&ReceiveFilter>,
        layout: &ChannelLayout,
        raw: &[i16],
        buffers: &mut TransformBuffers,
    ) -> PrepResult<()> {
        let required = layout.required_elements();
        debug_assert!(layout.validate().is_ok());
        // The worker slices are carved from raw pointers, so the size checks
        // guarding them must hold in release builds too
        assert!(raw.len() >= required, "raw frame shorter than layout");
        assert!(buffers.input.len() >= required, "input buffer too small");
        assert!(buffers.fft.len() >= required, "spectrum buffer too small");
        assert!(buffers.ifft.len() >= required, "output buffer too small");
        if let Some(filter) = filter {
            debug_assert_eq!(filter.response().len(), layout.sample_count / 2);
        }

        let started = Instant::now();
        let plan = SpectrumPlan::new(layout.sample_count);
        let workers = self.workers.min(layout.channel_count);

        let mut caller_scratch = plan.make_scratch()?;
        let mut worker_scratches = Vec::with_capacity(workers);
        for _ in 0..workers {
            worker_scratches.push(plan.make_scratch()?);
        }

        let frame = FrameBuffers {
            input: buffers.input.as_mut_ptr(),
            fft: buffers.fft.as_mut_ptr(),
            ifft: buffers.ifft.as_mut_ptr(),
            stride: layout.channel_stride,
        };
        let next_channel = AtomicUsize::new(0);
        let ctx = WorkerContext {
            frame: &frame,
            raw,
            filter,
            layout,
            plan: &plan,
            next_channel: &next_channel,
        };

        thread::scope(|scope| {
            for scratch in worker_scratches.iter_mut() {
                scope.spawn(move || condition_channels(ctx, scratch));
            }
            condition_channels(ctx, &mut caller_scratch);
        });

        debug!(
            channels = layout.channel_count,
            transmits = layout.transmit_count,
            workers,
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            "conditioned frame"
        );
        Ok(())
    }
}

/// Claim loop run by every worker and by the calling thread
fn condition_channels(ctx: WorkerContext<'_>, scratch: &mut SpectrumScratch) {
    let layout = ctx.layout;
    loop {
        // Claims only need to be unique; the scope join publishes the
        // results to the caller
        let claimed = ctx.next_channel.fetch_add(1, Ordering::Relaxed);
        if claimed >= layout.channel_count {
            break;
        }
        let channel = claimed + layout.channel_offset;
        let base = channel * layout.channel_stride;
        let raw = &ctx.raw[base..base + layout.channel_stride];
        // Safety: the claim counter hands each channel to exactly one worker
        // and `process` checked the buffer sizes up front
        let (input, fft, ifft) = unsafe { ctx.frame.channel(channel) };

        for (sample, &value) in input.iter_mut().zip(raw) {
            *sample = value as Sample;
        }

        let filter = match ctx.filter {
            Some(filter) => filter,
            None => {
                // Pass-through: emit the converted samples unchanged
                for (out, &sample) in ifft.iter_mut().zip(input.iter()) {
                    *out = Complex64::new(sample, 0.0);
                }
                continue;
            }
        };

        for transmit in 0..layout.transmit_count {
            let start = transmit * layout.sample_count;
            let end = start + layout.sample_count;
            ctx.plan
                .forward_one_sided(&input[start..end], &mut fft[start..end], scratch);
            filter.apply_to(&mut fft[start..end]);
            ctx.plan
                .inverse_into(&mut fft[start..end], &mut ifft[start..end], scratch);
        }
        // Stride padding beyond the transmit blocks carries no signal
        for value in &mut ifft[layout.sample_count * layout.transmit_count..] {
            *value = Complex64::new(0.0, 0.0);
        }
        let scale = 1.0 / layout.sample_count as f64;
        for value in ifft.iter_mut() {
            *value *= scale;
        }
    }
}

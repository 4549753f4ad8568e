//! # Ultrasound Receive Conditioning
//!
//! This crate prepares raw ultrasound receive data for beamforming. It
//! covers the three steps between the data acquisition hardware and the
//! decode/beamform stages:
//!
//! - **Filter design**: synthesize the composite one-sided frequency
//!   response (low-pass, matched filter, analytic conversion) applied to
//!   every channel, together with the time offset the filtering introduces
//! - **Frame conditioning**: convert and filter every channel/transmit
//!   block of a frame in parallel across a fixed worker pool
//! - **Decode matrices**: build the ±1 Hadamard-type matrices that unmix
//!   multiplexed transmit encodings
//!
//! ## Signal Flow
//!
//! ```text
//! raw i16 frame ─> convert ─> FFT ─> × filter ─> IFFT ─> decode ─> beamform
//!                  [ conditioning pipeline    ]    [ decode matrix ]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use usprep_core::prelude::*;
//!
//! // Design the receive filter once per acquisition configuration
//! let spec = FilterSpec {
//!     sample_count: 64,
//!     sampling_frequency: 40e6,
//!     transmit_frequency: 0.0,
//!     center_frequency: 0.0,
//!     low_pass_cutoff: 10e6,
//!     low_pass_order: 17,
//!     analytic: true,
//! };
//! let filter = ReceiveFilter::design(&spec).unwrap();
//!
//! // Condition one frame of raw receive data
//! let layout = ChannelLayout::contiguous(64, 4, 2);
//! let raw = vec![0i16; layout.required_elements()];
//! let mut buffers = TransformBuffers::for_layout(&layout).unwrap();
//! let pipeline = TransformPipeline::new(1);
//! pipeline.process(Some(&filter), &layout, &raw, &mut buffers).unwrap();
//!
//! // Decode matrix for an 8-transmit Hadamard encoding
//! let decode = DecodeMatrix::build(8).unwrap();
//! assert_eq!(decode.dim(), 8);
//! ```

pub mod decode_matrix;
pub mod filter_design;
pub mod pipeline;
pub mod spectrum;
pub mod types;

// Re-export main types
pub use decode_matrix::{kronecker, sylvester, DecodeMatrix};
pub use filter_design::{FilterSpec, ReceiveFilter};
pub use pipeline::{ChannelLayout, TransformBuffers, TransformPipeline, TransmitLayout};
pub use spectrum::{peak_index, SpectrumPlan, SpectrumScratch};
pub use types::{Complex, PrepError, PrepResult, Sample};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::decode_matrix::DecodeMatrix;
    pub use crate::filter_design::{FilterSpec, ReceiveFilter};
    pub use crate::pipeline::{ChannelLayout, TransformBuffers, TransformPipeline, TransmitLayout};
    pub use crate::types::{Complex, PrepError, PrepResult, Sample};
}

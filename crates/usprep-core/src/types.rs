//! Core types for receive-data conditioning
//!
//! Shared aliases and the crate-wide error type. Raw acquisition samples
//! arrive as signed 16-bit integers; every transform stage works in `f64`
//! (`Sample`) and one-sided spectra are held as `Complex` bins.

use num_complex::Complex64;

/// Complex spectral bin or conditioned output sample, f64 precision
pub type Complex = Complex64;

/// Real-valued working sample
pub type Sample = f64;

/// Result type for conditioning operations
pub type PrepResult<T> = Result<T, PrepError>;

/// Errors that can occur during filter design, frame conditioning, and
/// decode matrix generation
#[derive(Debug, Clone, thiserror::Error)]
pub enum PrepError {
    #[error("allocation of {what} failed ({bytes} bytes)")]
    Allocation { what: &'static str, bytes: usize },

    #[error("unsupported decode matrix dimension {0}: must be a power of two or 12 times a power of two")]
    UnsupportedDimension(usize),

    #[error("invalid channel layout: {0}")]
    InvalidLayout(String),
}

/// Zero-initialized buffer with allocation failure surfaced as a typed error.
///
/// Every working buffer in the crate goes through here so an out-of-memory
/// condition names what could not be obtained instead of aborting.
pub(crate) fn try_alloc<T: Clone + Default>(len: usize, what: &'static str) -> PrepResult<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| PrepError::Allocation {
            what,
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}

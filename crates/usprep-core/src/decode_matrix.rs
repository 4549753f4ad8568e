//! Decode matrices for multiplexed transmit encodings
//!
//! Encoded acquisitions drive several transmit events at once with a ±1
//! weighting pattern; decoding the receive data needs the matching
//! Hadamard-type matrix. This module builds those matrices for every
//! supported transmit count: powers of two come from the Sylvester
//! construction, and multiples of twelve from the Kronecker product of a
//! Sylvester matrix with a fixed 12x12 base.
//!
//! The matrices are stored row-major as the TRANSPOSE of the logical
//! encoding matrix, which is the orientation the decode consumer indexes.
//! Orthogonality is unaffected: `M * M^T = n * I` either way.
//!
//! ## Example
//!
//! ```rust
//! use usprep_core::decode_matrix::DecodeMatrix;
//!
//! let matrix = DecodeMatrix::build(4).unwrap();
//! assert_eq!(matrix.dim(), 4);
//! assert_eq!(matrix.get(1, 1), -1);
//!
//! // Only powers of two and 12 * 2^k are constructible
//! assert!(DecodeMatrix::build(7).is_err());
//! ```

use tracing::debug;

use crate::types::{try_alloc, PrepError, PrepResult};

/// 12x12 Hadamard base matrix, stored transposed, row-major
#[rustfmt::skip]
const HADAMARD_12_TRANSPOSE: [i32; 144] = [
    1,  1,  1,  1,  1,  1,  1,  1,  1,  1,  1,  1,
    1, -1, -1,  1, -1, -1, -1,  1,  1,  1, -1,  1,
    1,  1, -1, -1,  1, -1, -1, -1,  1,  1,  1, -1,
    1, -1,  1, -1, -1,  1, -1, -1, -1,  1,  1,  1,
    1,  1, -1,  1, -1, -1,  1, -1, -1, -1,  1,  1,
    1,  1,  1, -1,  1, -1, -1,  1, -1, -1, -1,  1,
    1,  1,  1,  1, -1,  1, -1, -1,  1, -1, -1, -1,
    1, -1,  1,  1,  1, -1,  1, -1, -1,  1, -1, -1,
    1, -1, -1,  1,  1,  1, -1,  1, -1, -1,  1, -1,
    1, -1, -1, -1,  1,  1,  1, -1,  1, -1, -1,  1,
    1,  1, -1, -1, -1,  1,  1,  1, -1,  1, -1, -1,
    1, -1,  1, -1, -1, -1,  1,  1,  1, -1,  1, -1,
];

/// Sylvester construction of the `dim x dim` Hadamard matrix, row-major.
///
/// Starts from `[1]` and doubles: each step copies the current block into
/// the top-right and bottom-left quadrants and negates it into the
/// bottom-right. `dim` must be a power of two.
pub fn sylvester(dim: usize) -> PrepResult<Vec<i32>> {
    debug_assert!(dim.is_power_of_two());
    let mut out = try_alloc::<i32>(dim * dim, "sylvester matrix")?;

    out[0] = 1;
    let mut k = 1;
    while k < dim {
        for i in 0..k {
            for j in 0..k {
                let value = out[i * dim + j];
                out[(i + k) * dim + j] = value;
                out[i * dim + (j + k)] = value;
                out[(i + k) * dim + (j + k)] = -value;
            }
        }
        k *= 2;
    }
    Ok(out)
}

/// Kronecker product of two square row-major matrices.
///
/// The result has dimension `a_dim * b_dim`; entry `(i*b+k, j*b+l)` is
/// `a[i][j] * b[k][l]`.
pub fn kronecker(a: &[i32], a_dim: usize, b: &[i32], b_dim: usize) -> PrepResult<Vec<i32>> {
    debug_assert_eq!(a.len(), a_dim * a_dim);
    debug_assert_eq!(b.len(), b_dim * b_dim);
    let out_dim = a_dim * b_dim;
    let mut out = try_alloc::<i32>(out_dim * out_dim, "kronecker product")?;

    for i in 0..a_dim {
        for j in 0..a_dim {
            let scale = a[i * a_dim + j];
            for k in 0..b_dim {
                for l in 0..b_dim {
                    out[(i * b_dim + k) * out_dim + j * b_dim + l] = scale * b[k * b_dim + l];
                }
            }
        }
    }
    Ok(out)
}

/// Square ±1 decode matrix for one encoded transmit group.
///
/// Built once per transmit count and reusable across frames; the result
/// depends only on the dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeMatrix {
    dim: usize,
    data: Vec<i32>,
}

impl DecodeMatrix {
    /// Build the decode matrix for `dim` transmit events.
    ///
    /// `dim` must be a power of two, or twelve times a power of two;
    /// anything else is rejected with
    /// [`crate::types::PrepError::UnsupportedDimension`] rather than
    /// producing a non-orthogonal matrix.
    pub fn build(dim: usize) -> PrepResult<Self> {
        let data = if dim.is_power_of_two() {
            sylvester(dim)?
        } else if dim % 12 == 0 && (dim / 12).is_power_of_two() {
            kronecker(&sylvester(dim / 12)?, dim / 12, &HADAMARD_12_TRANSPOSE, 12)?
        } else {
            return Err(PrepError::UnsupportedDimension(dim));
        };
        debug!(dim, "built decode matrix");
        Ok(Self { dim, data })
    }

    /// Whether [`DecodeMatrix::build`] accepts `dim`
    pub fn is_supported_dim(dim: usize) -> bool {
        dim.is_power_of_two() || (dim % 12 == 0 && (dim / 12).is_power_of_two())
    }

    /// Matrix dimension
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Entry at `(row, column)` in the stored (transposed) orientation
    pub fn get(&self, row: usize, column: usize) -> i32 {
        self.data[row * self.dim + column]
    }

    /// Row-major entries in the stored (transposed) orientation
    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `M * M^T` must be `dim * I` for a Hadamard-type matrix
    fn assert_orthogonal(matrix: &DecodeMatrix) {
        let dim = matrix.dim();
        for i in 0..dim {
            for j in 0..dim {
                let mut dot: i64 = 0;
                for k in 0..dim {
                    dot += i64::from(matrix.get(i, k)) * i64::from(matrix.get(j, k));
                }
                let expected = if i == j { dim as i64 } else { 0 };
                assert_eq!(dot, expected, "rows {i} and {j}");
            }
        }
    }

    #[test]
    fn test_sylvester_base_cases() {
        assert_eq!(DecodeMatrix::build(1).unwrap().as_slice(), &[1]);
        assert_eq!(DecodeMatrix::build(2).unwrap().as_slice(), &[1, 1, 1, -1]);
    }

    #[test]
    fn test_all_supported_dims_are_orthogonal() {
        for dim in [1, 2, 4, 8, 12, 16, 24, 48, 64, 96] {
            let matrix = DecodeMatrix::build(dim).unwrap();
            assert_eq!(matrix.dim(), dim);
            assert!(matrix.as_slice().iter().all(|&v| v == 1 || v == -1));
            assert_orthogonal(&matrix);
        }
    }

    #[test]
    fn test_unsupported_dims_are_rejected() {
        for dim in [0, 3, 5, 7, 36, 100] {
            assert!(
                matches!(
                    DecodeMatrix::build(dim),
                    Err(PrepError::UnsupportedDimension(d)) if d == dim
                ),
                "dimension {dim} should be rejected"
            );
            assert!(!DecodeMatrix::is_supported_dim(dim));
        }
    }

    #[test]
    fn test_twelve_uses_the_base_matrix() {
        let matrix = DecodeMatrix::build(12).unwrap();
        assert_eq!(matrix.as_slice(), &HADAMARD_12_TRANSPOSE);
    }

    #[test]
    fn test_twenty_four_is_blocked_base() {
        // kron(sylvester(2), base) lays the base out in 2x2 sign blocks
        let matrix = DecodeMatrix::build(24).unwrap();
        for i in 0..12 {
            for j in 0..12 {
                let base = HADAMARD_12_TRANSPOSE[i * 12 + j];
                assert_eq!(matrix.get(i, j), base);
                assert_eq!(matrix.get(i, j + 12), base);
                assert_eq!(matrix.get(i + 12, j), base);
                assert_eq!(matrix.get(i + 12, j + 12), -base);
            }
        }
    }

    #[test]
    fn test_kronecker_with_identity_scalar() {
        let base = [1, 1, 1, -1];
        assert_eq!(kronecker(&[1], 1, &base, 2).unwrap(), base);
        assert_eq!(kronecker(&base, 2, &[1], 1).unwrap(), base);
    }

    #[test]
    fn test_sylvester_matches_kronecker_doubling() {
        // sylvester(2k) == kron(sylvester(2), sylvester(k))
        let two = sylvester(2).unwrap();
        let four = sylvester(4).unwrap();
        assert_eq!(kronecker(&two, 2, &two, 2).unwrap(), four);

        let eight = sylvester(8).unwrap();
        assert_eq!(kronecker(&two, 2, &four, 4).unwrap(), eight);
    }
}

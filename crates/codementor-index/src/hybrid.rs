use crate::error::{IndexError, Result};
use crate::types::SparseVector;

/// Weight a dense/sparse query pair by `alpha`: `alpha * dense`, `(1 - alpha) * sparse`.
///
/// `alpha = 1.0` is a pure dense query, `alpha = 0.0` pure sparse. Sparse
/// indices are untouched.
///
/// # Errors
///
/// Returns `InvalidArgument` when `alpha` is outside `[0, 1]` or NaN.
pub fn hybrid_scale(
    dense: &[f32],
    sparse: &SparseVector,
    alpha: f32,
) -> Result<(Vec<f32>, SparseVector)> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(IndexError::InvalidArgument(format!(
            "alpha must be between 0 and 1, got {alpha}"
        )));
    }
    let scaled_dense = dense.iter().map(|v| v * alpha).collect();
    let scaled_sparse = SparseVector {
        indices: sparse.indices.clone(),
        values: sparse.values.iter().map(|v| v * (1.0 - alpha)).collect(),
    };
    Ok((scaled_dense, scaled_sparse))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn extremes_select_one_side() {
        let sparse = SparseVector {
            indices: vec![3, 7],
            values: vec![0.5, 0.25],
        };
        let (dense, s) = hybrid_scale(&[1.0, 2.0], &sparse, 1.0).unwrap();
        assert_eq!(dense, vec![1.0, 2.0]);
        assert_eq!(s.values, vec![0.0, 0.0]);
        assert_eq!(s.indices, vec![3, 7]);

        let (dense, s) = hybrid_scale(&[1.0, 2.0], &sparse, 0.0).unwrap();
        assert_eq!(dense, vec![0.0, 0.0]);
        assert_eq!(s.values, vec![0.5, 0.25]);
    }

    #[test]
    fn nan_alpha_rejected() {
        let err = hybrid_scale(&[1.0], &SparseVector::default(), f32::NAN).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    proptest! {
        #[test]
        fn scaling_is_elementwise(
            dense in prop::collection::vec(-10.0f32..10.0, 0..32),
            values in prop::collection::vec(0.0f32..5.0, 0..16),
            alpha in 0.0f32..=1.0,
        ) {
            let indices: Vec<u32> = (0..values.len()).map(|i| u32::try_from(i).unwrap() * 3).collect();
            let sparse = SparseVector { indices: indices.clone(), values: values.clone() };
            let (d, s) = hybrid_scale(&dense, &sparse, alpha).unwrap();
            prop_assert_eq!(d.len(), dense.len());
            for (out, orig) in d.iter().zip(&dense) {
                prop_assert_eq!(*out, orig * alpha);
            }
            prop_assert_eq!(s.indices, indices);
            for (out, orig) in s.values.iter().zip(&values) {
                prop_assert_eq!(*out, orig * (1.0 - alpha));
            }
        }

        #[test]
        fn out_of_range_alpha_fails(alpha in prop_oneof![-100.0f32..-0.0001, 1.0001f32..100.0]) {
            let result = hybrid_scale(&[1.0], &SparseVector::default(), alpha);
            prop_assert!(matches!(result, Err(IndexError::InvalidArgument(_))));
        }
    }
}

//! Attention-masked mean pooling and L2 normalization

use ndarray::{ArrayView2, ArrayView3, Axis};

/// Average token vectors over positions whose attention mask is 1
///
/// `hidden` is `[batch, seq, dim]`, `mask` is `[batch, seq]`. Padding
/// positions never contribute and never count towards the divisor. A row with
/// no unmasked positions pools to the zero vector.
pub fn mean_pool(hidden: ArrayView3<'_, f32>, mask: ArrayView2<'_, i64>) -> Vec<Vec<f32>> {
    let dim = hidden.len_of(Axis(2));

    hidden
        .axis_iter(Axis(0))
        .zip(mask.axis_iter(Axis(0)))
        .map(|(tokens, row_mask)| {
            let mut sum = vec![0.0f32; dim];
            let mut count = 0usize;

            for (token, &m) in tokens.axis_iter(Axis(0)).zip(row_mask.iter()) {
                if m == 1 {
                    for (acc, value) in sum.iter_mut().zip(token.iter()) {
                        *acc += value;
                    }
                    count += 1;
                }
            }

            if count > 0 {
                let n = count as f32;
                sum.iter_mut().for_each(|v| *v /= n);
            }
            sum
        })
        .collect()
}

/// Euclidean length of a vector
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length in place; zero vectors are left untouched
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = l2_norm(vector);
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_mean_pool_ignores_padding() {
        // batch=1, seq=3, dim=2; last position is padding with huge values
        let hidden =
            Array3::from_shape_vec((1, 3, 2), vec![1.0, 2.0, 3.0, 4.0, 100.0, 100.0]).unwrap();
        let mask = Array2::from_shape_vec((1, 3), vec![1, 1, 0]).unwrap();

        let pooled = mean_pool(hidden.view(), mask.view());

        assert_eq!(pooled.len(), 1);
        assert_eq!(pooled[0], vec![2.0, 3.0]);
    }

    #[test]
    fn test_mean_pool_batch_rows_are_independent() {
        let hidden = Array3::from_shape_vec(
            (2, 2, 2),
            vec![1.0, 1.0, 3.0, 3.0, 10.0, 0.0, 0.0, 10.0],
        )
        .unwrap();
        let mask = Array2::from_shape_vec((2, 2), vec![1, 1, 1, 0]).unwrap();

        let pooled = mean_pool(hidden.view(), mask.view());

        assert_eq!(pooled[0], vec![2.0, 2.0]);
        assert_eq!(pooled[1], vec![10.0, 0.0]);
    }

    #[test]
    fn test_mean_pool_fully_masked_row() {
        let hidden = Array3::from_shape_vec((1, 2, 2), vec![5.0, 5.0, 5.0, 5.0]).unwrap();
        let mask = Array2::from_shape_vec((1, 2), vec![0, 0]).unwrap();

        let pooled = mean_pool(hidden.view(), mask.view());
        assert_eq!(pooled[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let mut v = vec![3.0, 4.0, 0.0, -12.0];
        l2_normalize(&mut v);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-3);
        assert!((v[0] - 3.0 / 13.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_is_noop() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }
}

//! Attention visibility masks. Value 1 marks a visible key position,
//! value 0 a masked one.

use ndarray::{Array2, Array3, Axis};

/// Lower-triangular causal mask of shape `(1, seq_len, seq_len)`, diagonal
/// included, shared by every decoder layer of one call.
pub fn causal_mask(seq_len: usize) -> Array3<f32> {
    Array3::from_shape_fn((1, seq_len, seq_len), |(_, i, j)| {
        if j <= i { 1.0 } else { 0.0 }
    })
}

/// Reshape a `(batch, seq_len)` padding mask into the broadcastable
/// `(batch, 1, seq_len)` form consumed by attention.
pub fn pad_mask_to_rank3(mask: &Array2<f32>) -> Array3<f32> {
    mask.to_owned().insert_axis(Axis(1))
}

#[cfg(test)]
mod tests {
    use super::{causal_mask, pad_mask_to_rank3};
    use ndarray::array;

    #[test]
    fn causal_mask_matches_reference_values() {
        let mask = causal_mask(4);
        assert_eq!(mask.dim(), (1, 4, 4));
        let expected = [
            [1.0, 0.0, 0.0, 0.0],
            [1.0, 1.0, 0.0, 0.0],
            [1.0, 1.0, 1.0, 0.0],
            [1.0, 1.0, 1.0, 1.0],
        ];
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(mask[[0, i, j]], expected[i][j]);
            }
        }
    }

    #[test]
    fn causal_mask_row_visibility_counts() {
        let mask = causal_mask(4);
        for i in 0..4 {
            let visible: f32 = (0..4).map(|j| mask[[0, i, j]]).sum();
            assert_eq!(visible as usize, i + 1);
        }
    }

    #[test]
    fn padding_mask_gains_query_axis() {
        let mask = array![[1.0, 1.0, 0.0], [1.0, 0.0, 0.0]];
        let rank3 = pad_mask_to_rank3(&mask);
        assert_eq!(rank3.dim(), (2, 1, 3));
        assert_eq!(rank3[[1, 0, 1]], 0.0);
    }
}

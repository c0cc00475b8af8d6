use super::dropout::Dropout;
use super::linear::Linear;
use crate::error::{ModelError, Result};
use crate::weights::StateDict;
use ndarray::{s, Array2, Array3, Array4};
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

fn stable_softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}

/// softmax(Q Kᵗ / sqrt(d)) V over `(batch, heads, seq, head_dim)` inputs.
///
/// The mask, when present, is `(batch | 1, seq_q | 1, seq_k)`; zero entries
/// are filled with -inf before the softmax so no probability mass leaks to
/// masked keys. Per-(batch, head) score matrices are computed in parallel;
/// the optional attention dropout runs outside the parallel region.
pub fn scaled_dot_product_attention(
    q: &Array4<f32>,
    k: &Array4<f32>,
    v: &Array4<f32>,
    mask: Option<&Array3<f32>>,
    dropout: &mut Dropout,
) -> Result<Array4<f32>> {
    let (batch, heads, len_q, head_dim) = q.dim();
    if k.dim() != v.dim() {
        return Err(ModelError::TensorShape {
            name: "attention values".to_string(),
            got: v.shape().to_vec(),
            expected: k.shape().to_vec(),
        });
    }
    let (kb, kh, len_k, kd) = k.dim();
    if (kb, kh, kd) != (batch, heads, head_dim) {
        return Err(ModelError::TensorShape {
            name: "attention keys".to_string(),
            got: k.shape().to_vec(),
            expected: vec![batch, heads, len_k, head_dim],
        });
    }
    if let Some(m) = mask {
        let (mb, mq, mk) = m.dim();
        let batch_ok = mb == 1 || mb == batch;
        let query_ok = mq == 1 || mq == len_q;
        if mk != len_k || !batch_ok || !query_ok {
            return Err(ModelError::MaskShape {
                got: m.shape().to_vec(),
                expected: vec![batch, len_q, len_k],
            });
        }
    }

    let scale = 1.0 / (head_dim as f32).sqrt();
    let per_head: Vec<Array2<f32>> = (0..batch * heads)
        .into_par_iter()
        .map(|idx| {
            let (b, h) = (idx / heads, idx % heads);
            let q_bh = q.slice(s![b, h, .., ..]);
            let k_bh = k.slice(s![b, h, .., ..]);
            let mut scores = q_bh.dot(&k_bh.t());
            scores.mapv_inplace(|v| v * scale);
            if let Some(m) = mask {
                let (mb, mq, _) = m.dim();
                let mask_b = if mb == 1 { 0 } else { b };
                for ((i, j), score) in scores.indexed_iter_mut() {
                    let mask_q = if mq == 1 { 0 } else { i };
                    if m[[mask_b, mask_q, j]] == 0.0 {
                        *score = f32::NEG_INFINITY;
                    }
                }
            }
            stable_softmax_rows(&mut scores);
            scores
        })
        .collect();

    let mut weights = Array4::zeros((batch, heads, len_q, len_k));
    for (idx, w) in per_head.into_iter().enumerate() {
        weights
            .slice_mut(s![idx / heads, idx % heads, .., ..])
            .assign(&w);
    }
    let weights = dropout.apply(weights);

    let per_head: Vec<Array2<f32>> = (0..batch * heads)
        .into_par_iter()
        .map(|idx| {
            let (b, h) = (idx / heads, idx % heads);
            weights
                .slice(s![b, h, .., ..])
                .dot(&v.slice(s![b, h, .., ..]))
        })
        .collect();
    let mut out = Array4::zeros((batch, heads, len_q, head_dim));
    for (idx, o) in per_head.into_iter().enumerate() {
        out.slice_mut(s![idx / heads, idx % heads, .., ..])
            .assign(&o);
    }
    Ok(out)
}

/// `(batch, seq, embed)` -> `(batch, heads, seq, embed / heads)`.
///
/// The head split happens on the last axis before the head axis moves
/// outward; splitting batch-first instead would mix unrelated embedding
/// slices across heads.
pub(crate) fn split_heads(x: Array3<f32>, num_heads: usize) -> Result<Array4<f32>> {
    let (batch, seq, embed) = x.dim();
    let head_dim = embed / num_heads;
    let x = x.into_shape((batch, seq, num_heads, head_dim))?;
    let x = x.permuted_axes([0, 2, 1, 3]);
    // the transpose crosses the head axis, so force a contiguous copy
    Ok(x.as_standard_layout().to_owned())
}

/// Inverse of [`split_heads`].
pub(crate) fn merge_heads(x: Array4<f32>) -> Result<Array3<f32>> {
    let (batch, heads, seq, head_dim) = x.dim();
    let x = x.permuted_axes([0, 2, 1, 3]);
    let x = x.as_standard_layout().to_owned();
    Ok(x.into_shape((batch, seq, heads * head_dim))?)
}

pub struct MultiHeadAttention {
    pub num_heads: usize,
    pub head_dim: usize,
    pub w_q: Linear,
    pub w_k: Linear,
    pub w_v: Linear,
    pub w_o: Linear,
    dropout: Dropout,
}

impl MultiHeadAttention {
    pub fn new(
        embed_size: usize,
        num_heads: usize,
        use_additional_dropout: bool,
        rng: &mut StdRng,
    ) -> Self {
        let p = if use_additional_dropout { 0.1 } else { 0.0 };
        MultiHeadAttention {
            num_heads,
            head_dim: embed_size / num_heads,
            w_q: Linear::new(embed_size, embed_size, rng),
            w_k: Linear::new(embed_size, embed_size, rng),
            w_v: Linear::new(embed_size, embed_size, rng),
            w_o: Linear::new(embed_size, embed_size, rng),
            dropout: Dropout::new(p, rng.r#gen()),
        }
    }

    /// q `(batch, seq_q, embed)`, k/v `(batch, seq_kv, embed)`; output
    /// `(batch, seq_q, embed)`.
    pub fn forward(
        &mut self,
        q: &Array3<f32>,
        k: &Array3<f32>,
        v: &Array3<f32>,
        mask: Option<&Array3<f32>>,
    ) -> Result<Array3<f32>> {
        let embed_size = self.num_heads * self.head_dim;
        for (name, x) in [("queries", q), ("keys", k), ("values", v)] {
            if x.dim().2 != embed_size || x.dim().0 != q.dim().0 {
                return Err(ModelError::TensorShape {
                    name: name.to_string(),
                    got: x.shape().to_vec(),
                    expected: vec![q.dim().0, x.dim().1, embed_size],
                });
            }
        }
        if k.dim() != v.dim() {
            return Err(ModelError::TensorShape {
                name: "values".to_string(),
                got: v.shape().to_vec(),
                expected: k.shape().to_vec(),
            });
        }

        let q = split_heads(self.w_q.forward(q)?, self.num_heads)?;
        let k = split_heads(self.w_k.forward(k)?, self.num_heads)?;
        let v = split_heads(self.w_v.forward(v)?, self.num_heads)?;
        let attended = scaled_dot_product_attention(&q, &k, &v, mask, &mut self.dropout)?;
        self.w_o.forward(&merge_heads(attended)?)
    }

    pub fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn xavier_uniform(&mut self, rng: &mut StdRng) {
        self.w_q.xavier_uniform(rng);
        self.w_k.xavier_uniform(rng);
        self.w_v.xavier_uniform(rng);
        self.w_o.xavier_uniform(rng);
    }

    pub fn export(&self, name: &str, state: &mut StateDict) {
        self.w_q.export(&format!("{name}.w_q"), state);
        self.w_k.export(&format!("{name}.w_k"), state);
        self.w_v.export(&format!("{name}.w_v"), state);
        self.w_o.export(&format!("{name}.w_o"), state);
    }

    pub fn import(&mut self, name: &str, state: &mut StateDict) -> Result<()> {
        self.w_q.import(&format!("{name}.w_q"), state)?;
        self.w_k.import(&format!("{name}.w_k"), state)?;
        self.w_v.import(&format!("{name}.w_v"), state)?;
        self.w_o.import(&format!("{name}.w_o"), state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_heads, scaled_dot_product_attention, split_heads, MultiHeadAttention};
    use crate::blocks::dropout::Dropout;
    use crate::error::ModelError;
    use crate::masks::causal_mask;
    use ndarray::{Array2, Array3, Array4};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn head_split_merge_round_trip() -> Result<(), ModelError> {
        let x = Array3::from_shape_fn((2, 3, 8), |(b, l, e)| (b * 100 + l * 10 + e) as f32);
        let merged = merge_heads(split_heads(x.clone(), 4)?)?;
        assert_eq!(merged, x);
        Ok(())
    }

    #[test]
    fn split_takes_contiguous_embedding_slices() -> Result<(), ModelError> {
        let x = Array3::from_shape_fn((1, 2, 4), |(_, l, e)| (l * 4 + e) as f32);
        let heads = split_heads(x, 2)?;
        // head 0 owns embedding columns 0..2, head 1 columns 2..4
        assert_eq!(heads[[0, 0, 0, 0]], 0.0);
        assert_eq!(heads[[0, 0, 0, 1]], 1.0);
        assert_eq!(heads[[0, 1, 0, 0]], 2.0);
        assert_eq!(heads[[0, 1, 1, 1]], 7.0);
        Ok(())
    }

    #[test]
    fn uniform_keys_give_uniform_attention() -> Result<(), ModelError> {
        let mut dropout = Dropout::new(0.0, 0);
        let q = Array4::from_elem((1, 1, 2, 2), 1.0);
        let k = Array4::from_elem((1, 1, 3, 2), 1.0);
        let v = Array4::from_shape_fn((1, 1, 3, 2), |(_, _, l, _)| l as f32);
        let out = scaled_dot_product_attention(&q, &k, &v, None, &mut dropout)?;
        // equal scores average the values: (0 + 1 + 2) / 3
        assert!((out[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((out[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn causal_mask_blocks_future_keys() -> Result<(), ModelError> {
        let mut dropout = Dropout::new(0.0, 0);
        let q = Array4::from_elem((1, 1, 3, 2), 1.0);
        let k = Array4::from_elem((1, 1, 3, 2), 1.0);
        let v = Array4::from_shape_fn((1, 1, 3, 2), |(_, _, l, _)| l as f32);
        let mask = causal_mask(3);
        let out = scaled_dot_product_attention(&q, &k, &v, Some(&mask), &mut dropout)?;
        // the first query only ever sees the first value
        assert!((out[[0, 0, 0, 0]] - 0.0).abs() < 1e-6);
        // the second sees the mean of values 0 and 1
        assert!((out[[0, 0, 1, 0]] - 0.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn identity_projections_pass_a_single_position_through() -> Result<(), ModelError> {
        let mut rng = StdRng::seed_from_u64(1);
        let mut mha = MultiHeadAttention::new(4, 2, false, &mut rng);
        for linear in [&mut mha.w_q, &mut mha.w_k, &mut mha.w_v, &mut mha.w_o] {
            linear.weight = Array2::eye(4);
            linear.bias.fill(0.0);
        }
        // one query attending only to itself: attention is the identity
        let x = Array3::from_shape_vec((1, 1, 4), vec![0.5, -1.0, 2.0, 3.0])?;
        let y = mha.forward(&x, &x, &x, None)?;
        let diff = y
            .iter()
            .zip(x.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max);
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn rejects_mask_with_wrong_key_length() {
        let mut dropout = Dropout::new(0.0, 0);
        let q = Array4::from_elem((1, 1, 2, 2), 1.0);
        let k = q.clone();
        let v = q.clone();
        let mask = causal_mask(3);
        assert!(matches!(
            scaled_dot_product_attention(&q, &k, &v, Some(&mask), &mut dropout),
            Err(ModelError::MaskShape { .. })
        ));
    }
}

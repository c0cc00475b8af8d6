use crate::error::{ModelError, Result};
use ndarray::{s, Array2, Array3};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;

/// Token embedding lookup table, shared between source and target sides.
pub struct Embedding {
    pub weight: Array2<f32>, // shape: [vocab_size, embed_size]
}

impl Embedding {
    pub fn new(vocab_size: usize, embed_size: usize, rng: &mut StdRng) -> Self {
        let limit = 1.0 / (embed_size as f32).sqrt();
        let dist = Uniform::new(-limit, limit);
        Embedding {
            weight: Array2::from_shape_fn((vocab_size, embed_size), |_| dist.sample(rng)),
        }
    }

    pub fn xavier_uniform(&mut self, rng: &mut StdRng) {
        super::linear::xavier_fill(&mut self.weight, rng);
    }

    /// Look up `(batch, seq)` token ids into `(batch, seq, embed_size)`.
    pub fn forward(&self, ids: &Array2<usize>) -> Result<Array3<f32>> {
        let (vocab_size, embed_size) = self.weight.dim();
        let (batch, seq) = ids.dim();
        let mut out = Array3::zeros((batch, seq, embed_size));
        for ((b, l), &id) in ids.indexed_iter() {
            if id >= vocab_size {
                return Err(ModelError::TokenOutOfRange { id, vocab_size });
            }
            out.slice_mut(s![b, l, ..]).assign(&self.weight.row(id));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::Embedding;
    use crate::error::ModelError;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn looks_up_rows_by_id() -> Result<(), ModelError> {
        let mut rng = StdRng::seed_from_u64(3);
        let emb = Embedding::new(5, 4, &mut rng);
        let ids = array![[0, 4], [2, 2]];
        let out = emb.forward(&ids)?;
        assert_eq!(out.dim(), (2, 2, 4));
        for i in 0..4 {
            assert_eq!(out[[0, 1, i]], emb.weight[[4, i]]);
            assert_eq!(out[[1, 0, i]], out[[1, 1, i]]);
        }
        Ok(())
    }

    #[test]
    fn rejects_out_of_vocabulary_ids() {
        let mut rng = StdRng::seed_from_u64(3);
        let emb = Embedding::new(5, 4, &mut rng);
        let ids = array![[5]];
        assert!(matches!(
            emb.forward(&ids),
            Err(ModelError::TokenOutOfRange { id: 5, vocab_size: 5 })
        ));
    }
}

use crate::error::Result;
use crate::weights::{insert1, insert2, take1, take2, StateDict};
use ndarray::{Array1, Array2, Array3};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;

pub struct Linear {
    pub weight: Array2<f32>, // shape: [out_dim, in_dim]
    pub bias: Array1<f32>,   // shape: [out_dim]
}

/// Xavier/Glorot uniform fill for a `[fan_out, fan_in]` matrix.
pub fn xavier_fill(weight: &mut Array2<f32>, rng: &mut StdRng) {
    let (fan_out, fan_in) = weight.dim();
    let limit = (6.0f32 / (fan_in + fan_out) as f32).sqrt();
    let dist = Uniform::new(-limit, limit);
    weight.mapv_inplace(|_| dist.sample(rng));
}

impl Linear {
    pub fn new(in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Self {
        let limit = 1.0 / (in_dim as f32).sqrt();
        let dist = Uniform::new(-limit, limit);
        Linear {
            weight: Array2::from_shape_fn((out_dim, in_dim), |_| dist.sample(rng)),
            bias: Array1::from_shape_fn(out_dim, |_| dist.sample(rng)),
        }
    }

    pub fn xavier_uniform(&mut self, rng: &mut StdRng) {
        xavier_fill(&mut self.weight, rng);
    }

    /// Apply the projection to every position of a `(batch, seq, in_dim)`
    /// tensor, yielding `(batch, seq, out_dim)`.
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, seq, in_dim) = x.dim();
        let out_dim = self.bias.len();
        let flat = x.as_standard_layout();
        let flat = flat.view().into_shape((batch * seq, in_dim))?;
        let out = flat.dot(&self.weight.t()) + &self.bias;
        Ok(out.into_shape((batch, seq, out_dim))?)
    }

    pub fn export(&self, name: &str, state: &mut StateDict) {
        insert2(state, format!("{name}.weight"), &self.weight);
        insert1(state, format!("{name}.bias"), &self.bias);
    }

    pub fn import(&mut self, name: &str, state: &mut StateDict) -> Result<()> {
        let (out_dim, in_dim) = self.weight.dim();
        self.weight = take2(state, &format!("{name}.weight"), out_dim, in_dim)?;
        self.bias = take1(state, &format!("{name}.bias"), out_dim)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Linear;
    use crate::error::ModelError;
    use ndarray::{array, Array1, Array3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn applies_projection_per_position() -> Result<(), ModelError> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut linear = Linear::new(2, 3, &mut rng);
        linear.weight = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        linear.bias = Array1::zeros(3);
        let x = Array3::from_shape_vec((1, 2, 2), vec![1.0, 2.0, 3.0, 4.0])?;
        let y = linear.forward(&x)?;
        assert_eq!(y.dim(), (1, 2, 3));
        assert_eq!(y[[0, 0, 2]], 3.0);
        assert_eq!(y[[0, 1, 2]], 7.0);
        Ok(())
    }

    #[test]
    fn init_stays_within_fan_in_bound() {
        let mut rng = StdRng::seed_from_u64(0);
        let linear = Linear::new(16, 8, &mut rng);
        let bound = 1.0 / 4.0;
        assert!(linear.weight.iter().all(|w| w.abs() <= bound));
    }
}

use super::dropout::Dropout;
use super::linear::Linear;
use crate::error::Result;
use crate::weights::StateDict;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::Rng;

/// Position-wise feed-forward block: `embed -> d_ff -> embed` with a ReLU
/// in between and optional dropout after the nonlinearity.
pub struct FeedForward {
    pub linear1: Linear,
    pub linear2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    pub fn new(
        embed_size: usize,
        d_ff: usize,
        use_additional_dropout: bool,
        rng: &mut StdRng,
    ) -> Self {
        let p = if use_additional_dropout { 0.1 } else { 0.0 };
        FeedForward {
            linear1: Linear::new(embed_size, d_ff, rng),
            linear2: Linear::new(d_ff, embed_size, rng),
            dropout: Dropout::new(p, rng.r#gen()),
        }
    }

    pub fn forward(&mut self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let hidden = self.linear1.forward(x)?;
        let hidden = hidden.mapv(|v| v.max(0.0));
        let hidden = self.dropout.apply(hidden);
        self.linear2.forward(&hidden)
    }

    pub fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn xavier_uniform(&mut self, rng: &mut StdRng) {
        self.linear1.xavier_uniform(rng);
        self.linear2.xavier_uniform(rng);
    }

    pub fn export(&self, name: &str, state: &mut StateDict) {
        self.linear1.export(&format!("{name}.linear1"), state);
        self.linear2.export(&format!("{name}.linear2"), state);
    }

    pub fn import(&mut self, name: &str, state: &mut StateDict) -> Result<()> {
        self.linear1.import(&format!("{name}.linear1"), state)?;
        self.linear2.import(&format!("{name}.linear2"), state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FeedForward;
    use crate::error::ModelError;
    use ndarray::{Array1, Array3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn relu_gates_the_hidden_layer() -> Result<(), ModelError> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut ff = FeedForward::new(2, 3, false, &mut rng);
        // hidden pre-activations are all negative, so the output is the
        // second layer's bias alone
        ff.linear1.weight.fill(-1.0);
        ff.linear1.bias.fill(-1.0);
        ff.linear2.bias = Array1::from_vec(vec![0.5, -0.5]);
        let x = Array3::from_elem((1, 2, 2), 1.0);
        let y = ff.forward(&x)?;
        assert!((y[[0, 0, 0]] - 0.5).abs() < 1e-6);
        assert!((y[[0, 1, 1]] + 0.5).abs() < 1e-6);
        Ok(())
    }
}

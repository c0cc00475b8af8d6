use crate::error::Result;
use crate::weights::{insert1, take1, StateDict};
use ndarray::{Array1, Array3, Axis};

pub struct LayerNorm {
    pub gamma: Array1<f32>, // scale
    pub beta: Array1<f32>,  // shift
    pub eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Self {
        LayerNorm {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            eps: 1e-5,
        }
    }

    /// Normalize over the last (embedding) axis, independently for every
    /// batch/sequence position.
    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        let mut out = x.clone();
        for mut lane in out.lanes_mut(Axis(2)) {
            let n = lane.len() as f32;
            let mean = lane.sum() / n;
            let var = lane.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
            let denom = (var + self.eps).sqrt();
            for (v, (g, b)) in lane
                .iter_mut()
                .zip(self.gamma.iter().zip(self.beta.iter()))
            {
                *v = g * (*v - mean) / denom + b;
            }
        }
        out
    }

    pub fn export(&self, name: &str, state: &mut StateDict) {
        insert1(state, format!("{name}.gamma"), &self.gamma);
        insert1(state, format!("{name}.beta"), &self.beta);
    }

    pub fn import(&mut self, name: &str, state: &mut StateDict) -> Result<()> {
        let dim = self.gamma.len();
        self.gamma = take1(state, &format!("{name}.gamma"), dim)?;
        self.beta = take1(state, &format!("{name}.beta"), dim)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::LayerNorm;
    use crate::error::ModelError;
    use ndarray::Array3;

    #[test]
    fn normalized_lanes_have_zero_mean_unit_variance() -> Result<(), ModelError> {
        let ln = LayerNorm::new(4);
        let x = Array3::from_shape_vec((1, 2, 4), vec![1.0, 2.0, 3.0, 4.0, -2.0, 0.0, 2.0, 8.0])?;
        let y = ln.forward(&x);
        for l in 0..2 {
            let mean: f32 = (0..4).map(|i| y[[0, l, i]]).sum::<f32>() / 4.0;
            let var: f32 = (0..4).map(|i| (y[[0, l, i]] - mean).powi(2)).sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
        Ok(())
    }
}

use super::attention::MultiHeadAttention;
use super::dropout::Dropout;
use super::feedforward::FeedForward;
use super::layernorm::LayerNorm;
use crate::error::Result;
use crate::weights::StateDict;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::Rng;

/// One encoder layer: self-attention and feed-forward residual sub-blocks.
/// The normalization placement (post vs pre) is fixed at construction.
pub struct EncoderLayer {
    pub mha: MultiHeadAttention,
    pub ff: FeedForward,
    pub ln1: LayerNorm,
    pub ln2: LayerNorm,
    dropout1: Dropout,
    dropout2: Dropout,
    post_ln: bool,
}

impl EncoderLayer {
    pub fn new(
        n_heads: usize,
        embed_size: usize,
        d_ff: usize,
        post_ln: bool,
        use_additional_dropout: bool,
        rng: &mut StdRng,
    ) -> Self {
        EncoderLayer {
            mha: MultiHeadAttention::new(embed_size, n_heads, use_additional_dropout, rng),
            ff: FeedForward::new(embed_size, d_ff, use_additional_dropout, rng),
            ln1: LayerNorm::new(embed_size),
            ln2: LayerNorm::new(embed_size),
            dropout1: Dropout::new(0.1, rng.r#gen()),
            dropout2: Dropout::new(0.1, rng.r#gen()),
            post_ln,
        }
    }

    /// x `(batch, seq_src, embed)`, mask `(batch, 1, seq_src)`.
    pub fn forward(&mut self, x: &Array3<f32>, mask: Option<&Array3<f32>>) -> Result<Array3<f32>> {
        if self.post_ln {
            let attended = self.mha.forward(x, x, x, mask)?;
            let attended = self.ln1.forward(&(x + &self.dropout1.apply(attended)));
            let fed = self.ff.forward(&attended)?;
            Ok(self.ln2.forward(&(&attended + &self.dropout2.apply(fed))))
        } else {
            let x_ln = self.ln1.forward(x);
            let attended = x + &self.dropout1.apply(self.mha.forward(&x_ln, &x_ln, &x_ln, mask)?);
            let attended_ln = self.ln2.forward(&attended);
            let fed = self.ff.forward(&attended_ln)?;
            Ok(attended + self.dropout2.apply(fed))
        }
    }

    pub fn set_training(&mut self, training: bool) {
        self.mha.set_training(training);
        self.ff.set_training(training);
        self.dropout1.set_training(training);
        self.dropout2.set_training(training);
    }

    pub fn xavier_uniform(&mut self, rng: &mut StdRng) {
        self.mha.xavier_uniform(rng);
        self.ff.xavier_uniform(rng);
    }

    pub fn export(&self, name: &str, state: &mut StateDict) {
        self.mha.export(&format!("{name}.mha"), state);
        self.ff.export(&format!("{name}.ff"), state);
        self.ln1.export(&format!("{name}.ln1"), state);
        self.ln2.export(&format!("{name}.ln2"), state);
    }

    pub fn import(&mut self, name: &str, state: &mut StateDict) -> Result<()> {
        self.mha.import(&format!("{name}.mha"), state)?;
        self.ff.import(&format!("{name}.ff"), state)?;
        self.ln1.import(&format!("{name}.ln1"), state)?;
        self.ln2.import(&format!("{name}.ln2"), state)?;
        Ok(())
    }
}

/// Stack of identical encoder layers. Pre-norm mode closes with one final
/// normalization because the residual stream is otherwise unnormalized at
/// the top; post-norm already normalizes after every sub-block.
pub struct Encoder {
    pub layers: Vec<EncoderLayer>,
    pub final_ln: Option<LayerNorm>,
}

impl Encoder {
    pub fn new(
        n_layers: usize,
        n_heads: usize,
        embed_size: usize,
        d_ff: usize,
        post_ln: bool,
        use_additional_dropout: bool,
        rng: &mut StdRng,
    ) -> Self {
        let layers = (0..n_layers)
            .map(|_| {
                EncoderLayer::new(
                    n_heads,
                    embed_size,
                    d_ff,
                    post_ln,
                    use_additional_dropout,
                    rng,
                )
            })
            .collect();
        Encoder {
            layers,
            final_ln: if post_ln {
                None
            } else {
                Some(LayerNorm::new(embed_size))
            },
        }
    }

    pub fn forward(
        &mut self,
        mut x: Array3<f32>,
        mask: Option<&Array3<f32>>,
    ) -> Result<Array3<f32>> {
        for layer in &mut self.layers {
            x = layer.forward(&x, mask)?;
        }
        if let Some(ln) = &self.final_ln {
            x = ln.forward(&x);
        }
        Ok(x)
    }

    pub fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }

    pub fn xavier_uniform(&mut self, rng: &mut StdRng) {
        for layer in &mut self.layers {
            layer.xavier_uniform(rng);
        }
    }

    pub fn export(&self, state: &mut StateDict) {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.export(&format!("encoder.layers.{i}"), state);
        }
        if let Some(ln) = &self.final_ln {
            ln.export("encoder.final_ln", state);
        }
    }

    pub fn import(&mut self, state: &mut StateDict) -> Result<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.import(&format!("encoder.layers.{i}"), state)?;
        }
        if let Some(ln) = &mut self.final_ln {
            ln.import("encoder.final_ln", state)?;
        }
        Ok(())
    }
}

use super::attention::MultiHeadAttention;
use super::dropout::Dropout;
use super::feedforward::FeedForward;
use super::layernorm::LayerNorm;
use crate::error::Result;
use crate::masks::causal_mask;
use crate::weights::StateDict;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::Rng;

/// One decoder layer: causally masked self-attention, cross-attention over
/// the encoder memory, then feed-forward, each as a residual sub-block.
pub struct DecoderLayer {
    pub mmha: MultiHeadAttention, // masked self-attention
    pub mha: MultiHeadAttention,  // encoder-decoder cross-attention
    pub ff: FeedForward,
    pub ln1: LayerNorm,
    pub ln2: LayerNorm,
    pub ln3: LayerNorm,
    dropout1: Dropout,
    dropout2: Dropout,
    dropout3: Dropout,
    post_ln: bool,
}

impl DecoderLayer {
    pub fn new(
        n_heads: usize,
        embed_size: usize,
        d_ff: usize,
        post_ln: bool,
        use_additional_dropout: bool,
        rng: &mut StdRng,
    ) -> Self {
        DecoderLayer {
            mmha: MultiHeadAttention::new(embed_size, n_heads, use_additional_dropout, rng),
            mha: MultiHeadAttention::new(embed_size, n_heads, use_additional_dropout, rng),
            ff: FeedForward::new(embed_size, d_ff, use_additional_dropout, rng),
            ln1: LayerNorm::new(embed_size),
            ln2: LayerNorm::new(embed_size),
            ln3: LayerNorm::new(embed_size),
            dropout1: Dropout::new(0.1, rng.r#gen()),
            dropout2: Dropout::new(0.1, rng.r#gen()),
            dropout3: Dropout::new(0.1, rng.r#gen()),
            post_ln,
        }
    }

    /// x `(batch, seq_tgt, embed)`, memory `(batch, seq_src, embed)`,
    /// causal_mask `(1, seq_tgt, seq_tgt)`, encoder_mask `(batch, 1, seq_src)`.
    pub fn forward(
        &mut self,
        x: &Array3<f32>,
        memory: &Array3<f32>,
        causal: &Array3<f32>,
        encoder_mask: Option<&Array3<f32>>,
    ) -> Result<Array3<f32>> {
        if self.post_ln {
            let attended = self.mmha.forward(x, x, x, Some(causal))?;
            let attended = self.ln1.forward(&(x + &self.dropout1.apply(attended)));
            let crossed = self
                .mha
                .forward(&attended, memory, memory, encoder_mask)?;
            let attended = self
                .ln2
                .forward(&(&attended + &self.dropout2.apply(crossed)));
            let fed = self.ff.forward(&attended)?;
            Ok(self.ln3.forward(&(&attended + &self.dropout3.apply(fed))))
        } else {
            let x_ln = self.ln1.forward(x);
            let attended =
                x + &self.dropout1.apply(self.mmha.forward(&x_ln, &x_ln, &x_ln, Some(causal))?);
            let attended_ln = self.ln2.forward(&attended);
            let crossed = self
                .mha
                .forward(&attended_ln, memory, memory, encoder_mask)?;
            let attended = attended + self.dropout2.apply(crossed);
            let attended_ln = self.ln3.forward(&attended);
            let fed = self.ff.forward(&attended_ln)?;
            Ok(attended + self.dropout3.apply(fed))
        }
    }

    pub fn set_training(&mut self, training: bool) {
        self.mmha.set_training(training);
        self.mha.set_training(training);
        self.ff.set_training(training);
        self.dropout1.set_training(training);
        self.dropout2.set_training(training);
        self.dropout3.set_training(training);
    }

    pub fn xavier_uniform(&mut self, rng: &mut StdRng) {
        self.mmha.xavier_uniform(rng);
        self.mha.xavier_uniform(rng);
        self.ff.xavier_uniform(rng);
    }

    pub fn export(&self, name: &str, state: &mut StateDict) {
        self.mmha.export(&format!("{name}.mmha"), state);
        self.mha.export(&format!("{name}.mha"), state);
        self.ff.export(&format!("{name}.ff"), state);
        self.ln1.export(&format!("{name}.ln1"), state);
        self.ln2.export(&format!("{name}.ln2"), state);
        self.ln3.export(&format!("{name}.ln3"), state);
    }

    pub fn import(&mut self, name: &str, state: &mut StateDict) -> Result<()> {
        self.mmha.import(&format!("{name}.mmha"), state)?;
        self.mha.import(&format!("{name}.mha"), state)?;
        self.ff.import(&format!("{name}.ff"), state)?;
        self.ln1.import(&format!("{name}.ln1"), state)?;
        self.ln2.import(&format!("{name}.ln2"), state)?;
        self.ln3.import(&format!("{name}.ln3"), state)?;
        Ok(())
    }
}

/// Stack of identical decoder layers sharing one per-call causal mask,
/// with the same trailing-normalization rule as the encoder.
pub struct Decoder {
    pub layers: Vec<DecoderLayer>,
    pub final_ln: Option<LayerNorm>,
}

impl Decoder {
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
                DecoderLayer::new(
                    n_heads,
                    embed_size,
                    d_ff,
                    post_ln,
                    use_additional_dropout,
                    rng,
                )
            })
            .collect();
        Decoder {
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
        memory: &Array3<f32>,
        encoder_mask: Option<&Array3<f32>>,
    ) -> Result<Array3<f32>> {
        let causal = causal_mask(x.dim().1);
        for layer in &mut self.layers {
            x = layer.forward(&x, memory, &causal, encoder_mask)?;
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
            layer.export(&format!("decoder.layers.{i}"), state);
        }
        if let Some(ln) = &self.final_ln {
            ln.export("decoder.final_ln", state);
        }
    }

    pub fn import(&mut self, state: &mut StateDict) -> Result<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.import(&format!("decoder.layers.{i}"), state)?;
        }
        if let Some(ln) = &mut self.final_ln {
            ln.import("decoder.final_ln", state)?;
        }
        Ok(())
    }
}

//! Top-level encoder-decoder model: embeddings, positional signal, the two
//! stacks, the tied vocabulary projection and persistence.

use crate::blocks::{Decoder, Dropout, Embedding, Encoder};
use crate::config::TransformerConfig;
use crate::error::{ModelError, Result};
use crate::masks::pad_mask_to_rank3;
use crate::positional::positional_encoding;
use crate::weights::{insert1, insert2, take1, take2, StateDict};
use ndarray::{s, Array1, Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.json";

pub struct Transformer {
    config: TransformerConfig,
    pos_enc: Array2<f32>,
    encoder: Encoder,
    decoder: Decoder,
    embeddings: Embedding,
    /// None when embeddings are tied; the projection then reads the
    /// embedding buffer directly so both consumers share one allocation.
    fc_weight: Option<Array2<f32>>,
    fc_bias: Array1<f32>,
    dropout: Dropout,
}

impl Transformer {
    pub fn new(config: TransformerConfig) -> Result<Self> {
        let seed = rand::thread_rng().r#gen();
        Self::with_seed(config, seed)
    }

    /// Construct with a fixed master seed; initialization and any
    /// training-mode dropout are reproducible for the same seed.
    pub fn with_seed(config: TransformerConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let pos_enc = positional_encoding(config.max_len, config.embed_size);
        let encoder = Encoder::new(
            config.n_encoder_layers,
            config.n_encoder_heads,
            config.embed_size,
            config.d_ff,
            config.post_ln,
            config.use_additional_dropout,
            &mut rng,
        );
        let decoder = Decoder::new(
            config.n_decoder_layers,
            config.n_decoder_heads,
            config.embed_size,
            config.d_ff,
            config.post_ln,
            config.use_additional_dropout,
            &mut rng,
        );
        let embeddings = Embedding::new(config.vocab_size, config.embed_size, &mut rng);
        let fc_limit = 1.0 / (config.embed_size as f32).sqrt();
        let fc_weight = if config.tie_embeddings {
            None
        } else {
            Some(Array2::from_shape_fn(
                (config.vocab_size, config.embed_size),
                |_| rng.gen_range(-fc_limit..fc_limit),
            ))
        };
        let fc_bias =
            Array1::from_shape_fn(config.vocab_size, |_| rng.gen_range(-fc_limit..fc_limit));
        let dropout = Dropout::new(0.1, rng.r#gen());
        let mut model = Transformer {
            config,
            pos_enc,
            encoder,
            decoder,
            embeddings,
            fc_weight,
            fc_bias,
            dropout,
        };
        if model.config.xavier_initialization {
            model.xavier_reset(&mut rng);
        }
        log::debug!(
            "initialized transformer: {} encoder / {} decoder layers, embed {}, vocab {}",
            model.config.n_encoder_layers,
            model.config.n_decoder_layers,
            model.config.embed_size,
            model.config.vocab_size
        );
        Ok(model)
    }

    /// Re-draw every weight matrix (anything with more than one axis) from
    /// a Xavier uniform distribution; biases and norm parameters keep
    /// their defaults.
    fn xavier_reset(&mut self, rng: &mut StdRng) {
        self.encoder.xavier_uniform(rng);
        self.decoder.xavier_uniform(rng);
        self.embeddings.xavier_uniform(rng);
        if let Some(w) = &mut self.fc_weight {
            crate::blocks::linear::xavier_fill(w, rng);
        }
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Enable or disable dropout everywhere. Off by default.
    pub fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
        self.encoder.set_training(training);
        self.decoder.set_training(training);
    }

    pub fn embedding_weight(&self) -> &Array2<f32> {
        &self.embeddings.weight
    }

    pub fn embedding_weight_mut(&mut self) -> &mut Array2<f32> {
        &mut self.embeddings.weight
    }

    /// The pre-softmax projection matrix; the embedding buffer itself when
    /// embeddings are tied.
    pub fn projection_weight(&self) -> &Array2<f32> {
        match &self.fc_weight {
            Some(w) => w,
            None => &self.embeddings.weight,
        }
    }

    pub fn projection_weight_mut(&mut self) -> &mut Array2<f32> {
        match &mut self.fc_weight {
            Some(w) => w,
            None => &mut self.embeddings.weight,
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.state_dict().values().map(|r| r.data.len()).sum()
    }

    /// Embedding lookup scaled by sqrt(embed_size) so the embedding and
    /// positional magnitudes are comparable.
    pub(crate) fn embed_scaled(&self, ids: &Array2<usize>) -> Result<Array3<f32>> {
        let scale = (self.config.embed_size as f32).sqrt();
        let mut x = self.embeddings.forward(ids)?;
        x.mapv_inplace(|v| v * scale);
        Ok(x)
    }

    fn embed_with_positions(&mut self, ids: &Array2<usize>) -> Result<Array3<f32>> {
        let len = ids.dim().1;
        if len > self.config.max_len {
            return Err(ModelError::SequenceTooLong {
                len,
                max_len: self.config.max_len,
            });
        }
        let mut x = self.embed_scaled(ids)?;
        x += &self.pos_enc.slice(s![..len, ..]);
        Ok(self.dropout.apply(x))
    }

    /// Run the encoder over `(batch, seq_src)` token ids. Returns the
    /// memory `(batch, seq_src, embed)` and the padding mask reshaped to
    /// its broadcastable `(batch, 1, seq_src)` form.
    pub fn encode(
        &mut self,
        src: &Array2<usize>,
        src_mask: Option<&Array2<f32>>,
    ) -> Result<(Array3<f32>, Option<Array3<f32>>)> {
        let (batch, seq_src) = src.dim();
        if let Some(m) = src_mask {
            if m.dim() != (batch, seq_src) {
                return Err(ModelError::MaskShape {
                    got: m.shape().to_vec(),
                    expected: vec![batch, seq_src],
                });
            }
        }
        let mask = src_mask.map(pad_mask_to_rank3);
        let x = self.embed_with_positions(src)?;
        let memory = self.encoder.forward(x, mask.as_ref())?;
        Ok((memory, mask))
    }

    /// Run the decoder against the encoder memory for `(batch, seq_tgt)`
    /// token ids and project to `(batch, seq_tgt, vocab_size)` logits.
    /// `src_mask` is the broadcastable mask returned by [`encode`].
    ///
    /// [`encode`]: Transformer::encode
    pub fn decode(
        &mut self,
        memory: &Array3<f32>,
        tgt: &Array2<usize>,
        src_mask: Option<&Array3<f32>>,
    ) -> Result<Array3<f32>> {
        let (batch, _) = tgt.dim();
        let (mem_batch, seq_src, mem_embed) = memory.dim();
        if mem_batch != batch || mem_embed != self.config.embed_size {
            return Err(ModelError::TensorShape {
                name: "memory".to_string(),
                got: memory.shape().to_vec(),
                expected: vec![batch, seq_src, self.config.embed_size],
            });
        }
        if let Some(m) = src_mask {
            if m.dim() != (batch, 1, seq_src) {
                return Err(ModelError::MaskShape {
                    got: m.shape().to_vec(),
                    expected: vec![batch, 1, seq_src],
                });
            }
        }
        let x = self.embed_with_positions(tgt)?;
        let attended = self.decoder.forward(x, memory, src_mask)?;
        self.project_vocab(&attended)
    }

    /// One full pass: encode the source, decode the target, return logits
    /// `(batch, seq_tgt, vocab_size)`.
    pub fn forward(
        &mut self,
        src: &Array2<usize>,
        tgt: &Array2<usize>,
        src_mask: Option<&Array2<f32>>,
    ) -> Result<Array3<f32>> {
        let (memory, mask) = self.encode(src, src_mask)?;
        self.decode(&memory, tgt, mask.as_ref())
    }

    fn project_vocab(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let weight = self.projection_weight();
        let (batch, seq, embed) = x.dim();
        let flat = x.as_standard_layout();
        let flat = flat.view().into_shape((batch * seq, embed))?;
        let logits = flat.dot(&weight.t()) + &self.fc_bias;
        Ok(logits.into_shape((batch, seq, weight.nrows()))?)
    }

    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        insert2(
            &mut state,
            "embeddings.weight".to_string(),
            &self.embeddings.weight,
        );
        if let Some(w) = &self.fc_weight {
            insert2(&mut state, "fc.weight".to_string(), w);
        }
        insert1(&mut state, "fc.bias".to_string(), &self.fc_bias);
        self.encoder.export(&mut state);
        self.decoder.export(&mut state);
        state
    }

    fn load_state(&mut self, state: &mut StateDict) -> Result<()> {
        let (vocab_size, embed_size) = self.embeddings.weight.dim();
        self.embeddings.weight = take2(state, "embeddings.weight", vocab_size, embed_size)?;
        if self.fc_weight.is_some() {
            self.fc_weight = Some(take2(state, "fc.weight", vocab_size, embed_size)?);
        }
        self.fc_bias = take1(state, "fc.bias", vocab_size)?;
        self.encoder.import(state)?;
        self.decoder.import(state)?;
        Ok(())
    }

    /// Write the config and the named weight tensors as two artifacts
    /// under `path`. The positional table is not persisted; it is a pure
    /// function of the config.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        let config_file = File::create(path.join(CONFIG_FILE))?;
        serde_json::to_writer_pretty(BufWriter::new(config_file), &self.config)?;
        let weights_file = File::create(path.join(WEIGHTS_FILE))?;
        serde_json::to_writer(BufWriter::new(weights_file), &self.state_dict())?;
        log::debug!("saved model to {}", path.display());
        Ok(())
    }

    /// Read the config artifact, rebuild a matching instance, then install
    /// every named tensor. Any missing, extra or mis-shaped tensor is an
    /// error; there is no partial load.
    pub fn load(path: &Path) -> Result<Self> {
        let config_file = File::open(path.join(CONFIG_FILE))?;
        let config: TransformerConfig = serde_json::from_reader(BufReader::new(config_file))?;
        let mut model = Self::with_seed(config, 0)?;
        let weights_file = File::open(path.join(WEIGHTS_FILE))?;
        let mut state: StateDict = serde_json::from_reader(BufReader::new(weights_file))?;
        model.load_state(&mut state)?;
        if let Some(name) = state.keys().next() {
            return Err(ModelError::UnexpectedTensor { name: name.clone() });
        }
        log::debug!("loaded model from {}", path.display());
        Ok(model)
    }
}

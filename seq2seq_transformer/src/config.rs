//! Configuration for the encoder-decoder transformer.

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub vocab_size: usize,
    pub n_encoder_layers: usize,
    pub n_decoder_layers: usize,
    pub n_encoder_heads: usize,
    pub n_decoder_heads: usize,
    pub embed_size: usize,
    pub d_ff: usize,
    pub max_len: usize,
    /// Share one weight matrix between the embedding lookup and the
    /// pre-softmax vocabulary projection.
    pub tie_embeddings: bool,
    /// Post-norm (`LN(x + sublayer(x))`) when true, pre-norm otherwise.
    pub post_ln: bool,
    /// Extra dropout on attention weights and inside the feed-forward
    /// block, beyond the canonical sub-layer dropout.
    pub use_additional_dropout: bool,
    /// Re-draw every weight matrix from a Xavier uniform distribution
    /// instead of the per-block defaults.
    pub xavier_initialization: bool,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        TransformerConfig {
            vocab_size: 8192,
            n_encoder_layers: 6,
            n_decoder_layers: 6,
            n_encoder_heads: 8,
            n_decoder_heads: 8,
            embed_size: 512,
            d_ff: 2048,
            max_len: 4096,
            tie_embeddings: true,
            post_ln: true,
            use_additional_dropout: false,
            xavier_initialization: false,
        }
    }
}

impl TransformerConfig {
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("vocab_size", self.vocab_size),
            ("n_encoder_layers", self.n_encoder_layers),
            ("n_decoder_layers", self.n_decoder_layers),
            ("n_encoder_heads", self.n_encoder_heads),
            ("n_decoder_heads", self.n_decoder_heads),
            ("embed_size", self.embed_size),
            ("d_ff", self.d_ff),
            ("max_len", self.max_len),
        ];
        for (field, value) in dims {
            if value == 0 {
                return Err(ModelError::ZeroDimension { field });
            }
        }
        for n_heads in [self.n_encoder_heads, self.n_decoder_heads] {
            if self.embed_size % n_heads != 0 {
                return Err(ModelError::HeadSplit {
                    embed_size: self.embed_size,
                    n_heads,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TransformerConfig;
    use crate::error::ModelError;

    #[test]
    fn default_config_is_valid() {
        assert!(TransformerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_head_count_not_dividing_embed_size() {
        let config = TransformerConfig {
            embed_size: 10,
            n_encoder_heads: 3,
            ..TransformerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ModelError::HeadSplit {
                embed_size: 10,
                n_heads: 3
            })
        ));
    }

    #[test]
    fn rejects_zero_dimensions() {
        let config = TransformerConfig {
            d_ff: 0,
            ..TransformerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ModelError::ZeroDimension { field: "d_ff" })
        ));
    }
}

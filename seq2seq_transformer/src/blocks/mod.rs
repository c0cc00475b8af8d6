pub mod attention;
pub mod decoder;
pub mod dropout;
pub mod embedding;
pub mod encoder;
pub mod feedforward;
pub mod layernorm;
pub mod linear;

pub use attention::MultiHeadAttention;
pub use decoder::{Decoder, DecoderLayer};
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use encoder::{Encoder, EncoderLayer};
pub use feedforward::FeedForward;
pub use layernorm::LayerNorm;
pub use linear::Linear;

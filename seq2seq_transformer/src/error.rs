//! Error types for model construction, forward passes and persistence.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("embed size {embed_size} is not divisible by {n_heads} attention heads")]
    HeadSplit { embed_size: usize, n_heads: usize },
    #[error("configuration field {field} must be non-zero")]
    ZeroDimension { field: &'static str },
    #[error("sequence length {len} exceeds the maximum of {max_len}")]
    SequenceTooLong { len: usize, max_len: usize },
    #[error("token id {id} is out of range for a vocabulary of {vocab_size}")]
    TokenOutOfRange { id: usize, vocab_size: usize },
    #[error("mask shape {got:?} does not match the expected {expected:?}")]
    MaskShape { got: Vec<usize>, expected: Vec<usize> },
    #[error("tensor {name} has shape {got:?}, expected {expected:?}")]
    TensorShape {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    #[error("weights file is missing tensor {name}")]
    MissingTensor { name: String },
    #[error("weights file contains tensor {name} with no place in this architecture")]
    UnexpectedTensor { name: String },
    #[error("internal reshape failed: {0}")]
    Reshape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub mod blocks;
pub mod config;
pub mod error;
pub mod masks;
pub mod positional;
pub mod transformer;
pub mod weights;

pub use config::TransformerConfig;
pub use error::{ModelError, Result};
pub use transformer::Transformer;

//! Sentence encoders that turn text into fixed-length vectors.

pub mod local;

use anyhow::{anyhow, Result};

pub use local::LocalEncoder;

/// Encoder used for both the corpus and user queries.
pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Output width of [`DEFAULT_MODEL_NAME`].
pub const DEFAULT_DIMENSION: usize = 384;

/// Blocking text encoder.
///
/// Implementations must return one vector per input, in input order, each of
/// length [`TextEncoder::dimension`].
pub trait TextEncoder: Send + Sync {
    /// Encodes a batch of texts.
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Encodes a single text.
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_batch(&[text])?
            .pop()
            .ok_or_else(|| anyhow!("encoder returned no embedding"))
    }

    /// Width of the produced vectors.
    fn dimension(&self) -> usize;

    /// Model identifier, for logs and index metadata.
    fn model_name(&self) -> &str;
}

//! In-process all-MiniLM-L6-v2 encoder backed by `fastembed`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{TextEncoder, DEFAULT_DIMENSION, DEFAULT_MODEL_NAME};

/// Runs the sentence encoder locally through ONNX Runtime.
pub struct LocalEncoder {
    model: Mutex<TextEmbedding>,
    batch_size: usize,
}

impl LocalEncoder {
    /// Loads the model, downloading it into `cache_dir` on first use.
    pub fn new(cache_dir: Option<PathBuf>, batch_size: usize, show_progress: bool) -> Result<Self> {
        let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(show_progress);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let model = TextEmbedding::try_new(options)
            .map_err(|err| anyhow!("failed to load {DEFAULT_MODEL_NAME}: {err}"))?;
        tracing::info!(model = DEFAULT_MODEL_NAME, "sentence encoder loaded");
        Ok(Self {
            model: Mutex::new(model),
            batch_size: batch_size.max(1),
        })
    }
}

impl TextEncoder for LocalEncoder {
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self
            .model
            .lock()
            .map_err(|_| anyhow!("encoder mutex poisoned"))?;
        let embeddings = model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|err| anyhow!("embedding {} texts failed: {err}", texts.len()))?;
        anyhow::ensure!(
            embeddings.len() == texts.len(),
            "encoder returned {} embeddings for {} inputs",
            embeddings.len(),
            texts.len()
        );
        if let Some(bad) = embeddings.iter().find(|v| v.len() != DEFAULT_DIMENSION) {
            anyhow::bail!(
                "encoder produced a {}-dimensional vector, expected {}",
                bad.len(),
                DEFAULT_DIMENSION
            );
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        DEFAULT_DIMENSION
    }

    fn model_name(&self) -> &str {
        DEFAULT_MODEL_NAME
    }
}

impl fmt::Debug for LocalEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEncoder")
            .field("model", &DEFAULT_MODEL_NAME)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

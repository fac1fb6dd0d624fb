//! Query-side semantic model: text → vector → nearest corpus rows.

use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{anyhow, Result};
use lru::LruCache;
use serde_json::{Map, Value};

use crate::columnar::CorpusRow;
use crate::encoder::TextEncoder;
use crate::vector_index::{IndexedVector, QueryMatch, VectorIndex};

/// Default number of neighbours per query.
pub const DEFAULT_TOP_K: usize = 10;

/// Default number of vectors per upsert request.
pub const DEFAULT_UPSERT_BATCH: usize = 100;

type ResultKey = (String, usize);

/// Pairs an encoder with an index and memoizes both stages per input string.
pub struct SemanticModel {
    encoder: Arc<dyn TextEncoder>,
    index: Arc<dyn VectorIndex>,
    encodings: Mutex<LruCache<String, Vec<f32>>>,
    results: Mutex<LruCache<ResultKey, Vec<QueryMatch>>>,
}

impl SemanticModel {
    /// Builds a model; `cache_size` of zero keeps every entry.
    pub fn new(encoder: Arc<dyn TextEncoder>, index: Arc<dyn VectorIndex>, cache_size: usize) -> Self {
        Self {
            encoder,
            index,
            encodings: Mutex::new(build_cache(cache_size)),
            results: Mutex::new(build_cache(cache_size)),
        }
    }

    /// The underlying encoder.
    pub fn encoder(&self) -> &dyn TextEncoder {
        self.encoder.as_ref()
    }

    /// Encodes `text`, reusing earlier encodings of the same string.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = lock(&self.encodings)?.get(text).cloned() {
            tracing::trace!("encoding cache hit");
            return Ok(hit);
        }
        let vector = self.encoder.encode(text)?;
        anyhow::ensure!(
            vector.len() == self.encoder.dimension(),
            "encoder returned {} values, expected {}",
            vector.len(),
            self.encoder.dimension()
        );
        lock(&self.encodings)?.put(text.to_string(), vector.clone());
        Ok(vector)
    }

    /// Nearest `top_k` corpus rows for `text`, best first.
    pub fn results(&self, text: &str, top_k: usize) -> Result<Vec<QueryMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let key = (text.to_string(), top_k);
        if let Some(hit) = lock(&self.results)?.get(&key).cloned() {
            tracing::debug!(top_k, "result cache hit");
            return Ok(hit);
        }

        let start = Instant::now();
        let vector = self.encode(text)?;
        let mut matches = self.index.query(&vector, top_k, false)?;
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        matches.truncate(top_k);
        tracing::debug!(
            top_k,
            returned = matches.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "semantic query"
        );
        lock(&self.results)?.put(key, matches.clone());
        Ok(matches)
    }

    /// Encodes corpus rows and upserts them, keyed by row position.
    ///
    /// Rows are numbered from zero in iteration order, so the stream must
    /// follow the consolidated table's order.
    pub fn index_corpus<I>(&self, rows: I, batch_size: usize) -> Result<IndexingStats>
    where
        I: IntoIterator<Item = Result<CorpusRow>>,
    {
        let batch_size = batch_size.max(1);
        let start = Instant::now();
        let mut stats = IndexingStats::default();
        let mut pending: Vec<(usize, CorpusRow)> = Vec::with_capacity(batch_size);

        for (position, row) in rows.into_iter().enumerate() {
            pending.push((position, row?));
            if pending.len() == batch_size {
                self.flush(&mut pending, &mut stats)?;
            }
        }
        self.flush(&mut pending, &mut stats)?;

        tracing::info!(
            model = self.encoder.model_name(),
            rows = stats.rows,
            upserted = stats.upserted,
            batches = stats.batches,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "indexing finished"
        );
        Ok(stats)
    }

    fn flush(&self, pending: &mut Vec<(usize, CorpusRow)>, stats: &mut IndexingStats) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let texts: Vec<&str> = pending.iter().map(|(_, row)| row.text.as_str()).collect();
        let embeddings = self.encoder.encode_batch(&texts)?;
        anyhow::ensure!(
            embeddings.len() == pending.len(),
            "encoder returned {} embeddings for {} rows",
            embeddings.len(),
            pending.len()
        );

        let mut vectors = Vec::with_capacity(pending.len());
        for ((position, row), values) in pending.drain(..).zip(embeddings) {
            anyhow::ensure!(
                values.len() == self.encoder.dimension(),
                "row {position} encoded to {} values, expected {}",
                values.len(),
                self.encoder.dimension()
            );
            vectors.push(IndexedVector {
                id: position.to_string(),
                values,
                metadata: Some(row_metadata(row, self.encoder.model_name())),
            });
        }

        let upserted = self.index.upsert(&vectors)?;
        stats.rows += vectors.len();
        stats.upserted += upserted;
        stats.batches += 1;
        tracing::info!(rows = stats.rows, batch = stats.batches, "upserted batch");
        Ok(())
    }
}

/// Totals of one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexingStats {
    /// Rows encoded.
    pub rows: usize,
    /// Vectors the index reported as stored.
    pub upserted: usize,
    /// Upsert requests sent.
    pub batches: usize,
}

fn row_metadata(row: CorpusRow, encoder: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("arxiv_id".to_string(), Value::String(row.id));
    metadata.insert("encoder".to_string(), Value::String(encoder.to_string()));
    if let Some(title) = row.title {
        metadata.insert("title".to_string(), Value::String(title));
    }
    metadata
}

fn build_cache<K, V>(size: usize) -> LruCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    match NonZeroUsize::new(size) {
        Some(capacity) => LruCache::new(capacity),
        None => LruCache::unbounded(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("semantic cache mutex poisoned"))
}

//! Offline ingestion: JSONL dump → batch files → consolidated tables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::columnar::{self, ConsolidationSummary};
use crate::corpus::{self, BatchPlan, FlatBatch, RecordReader};

/// Default number of batch files per run.
pub const DEFAULT_NUM_BATCHES: usize = 10;

/// File name of the full consolidated table.
pub const FULL_TABLE_FILE: &str = "arxiv_all.parquet";

/// File name of the identifier-only table.
pub const SMALL_TABLE_FILE: &str = "arxiv_all_small.parquet";

/// Inputs of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Newline-delimited JSON dump.
    pub input: PathBuf,
    /// Directory receiving batch files and consolidated tables.
    pub output_dir: PathBuf,
    /// Number of batches to split the input into.
    pub num_batches: usize,
    /// Whether to write the full table next to the small one.
    pub write_full: bool,
}

impl IngestConfig {
    /// Batch file path for batch `index`.
    pub fn batch_path(&self, index: usize) -> PathBuf {
        batch_path(&self.output_dir, index)
    }

    /// Path of the full consolidated table.
    pub fn full_table_path(&self) -> PathBuf {
        self.output_dir.join(FULL_TABLE_FILE)
    }

    /// Path of the identifier-only table.
    pub fn small_table_path(&self) -> PathBuf {
        self.output_dir.join(SMALL_TABLE_FILE)
    }
}

/// Batch file location inside `dir`.
pub fn batch_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("arxiv_{index}_cols.feather"))
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    /// Zero-based batch number.
    pub index: usize,
    /// Rows written to the batch file.
    pub rows: usize,
    /// Columns in the batch file.
    pub columns: usize,
    /// Batch file location.
    pub path: PathBuf,
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    /// Records read from the input.
    pub records: usize,
    /// Per-batch results in order.
    pub batches: Vec<BatchSummary>,
    /// Consolidated table results.
    pub tables: ConsolidationSummary,
}

/// Runs the whole ingestion pipeline.
pub fn run(config: &IngestConfig) -> Result<IngestSummary> {
    let start = Instant::now();
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {:?}", config.output_dir))?;

    let total = corpus::count_records(&config.input)?;
    let plan = BatchPlan::new(total, config.num_batches)?;
    tracing::info!(
        input = %config.input.display(),
        records = total,
        batches = plan.num_batches(),
        "loaded input"
    );

    let batches = write_batches(config, &plan)?;
    let written: usize = batches.iter().map(|batch| batch.rows).sum();
    anyhow::ensure!(
        written == plan.total(),
        "wrote {} rows but planned {}",
        written,
        plan.total()
    );
    tracing::info!("wrote {} batch files", batches.len());

    let paths: Vec<PathBuf> = batches.iter().map(|batch| batch.path.clone()).collect();
    let full_path = config.write_full.then(|| config.full_table_path());
    let tables = columnar::consolidate(&paths, full_path.as_deref(), &config.small_table_path())?;
    anyhow::ensure!(
        tables.rows == total,
        "consolidated {} rows but read {} records",
        tables.rows,
        total
    );
    tracing::info!(
        rows = tables.rows,
        columns = tables.columns,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "consolidated tables written"
    );

    Ok(IngestSummary {
        records: total,
        batches,
        tables,
    })
}

fn write_batches(config: &IngestConfig, plan: &BatchPlan) -> Result<Vec<BatchSummary>> {
    let mut reader = RecordReader::open(&config.input)?;
    let mut summaries = Vec::with_capacity(plan.num_batches());
    for (index, range) in plan.ranges().enumerate() {
        let lines = reader.next_batch(range.len())?;
        anyhow::ensure!(
            lines.len() == range.len(),
            "input shrank while reading: batch {} expected {} records, got {}",
            index,
            range.len(),
            lines.len()
        );
        let flat = FlatBatch::from_lines(lines)
            .with_context(|| format!("failed to flatten batch {index}"))?;
        let record_batch = columnar::to_record_batch(&flat)?;
        let path = config.batch_path(index);
        columnar::write_batch_file(&path, &record_batch)?;
        tracing::info!(
            batch = index,
            offset = range.start,
            rows = flat.len(),
            columns = flat.columns().len(),
            "wrote batch file"
        );
        summaries.push(BatchSummary {
            index,
            rows: flat.len(),
            columns: flat.columns().len(),
            path,
        });
    }
    Ok(summaries)
}

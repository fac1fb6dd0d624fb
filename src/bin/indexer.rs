use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use abstract_search::columnar::{CorpusColumns, CorpusRowReader, ID_COLUMN};
use abstract_search::encoder::{LocalEncoder, TextEncoder};
use abstract_search::ingest::FULL_TABLE_FILE;
use abstract_search::logging;
use abstract_search::semantic::{SemanticModel, DEFAULT_UPSERT_BATCH};
use abstract_search::vector_index::pinecone::{PineconeControl, PineconeSettings};
use abstract_search::vector_index::{
    ensure_index, IndexSpec, ReadinessPolicy, DEFAULT_INDEX_NAME,
};
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "abstract-indexer",
    about = "Embed the consolidated abstracts and upsert them into a Pinecone index"
)]
struct IndexerCli {
    /// Full consolidated table (defaults to <data-dir>/arxiv_all.parquet)
    #[arg(long, env = "ABSTRACT_SEARCH_TABLE")]
    table: Option<PathBuf>,

    /// Directory written by abstract-ingest
    #[arg(long, env = "ABSTRACT_SEARCH_DATA_DIR", default_value = "temp")]
    data_dir: PathBuf,

    /// Column holding the record identifier
    #[arg(long, default_value = ID_COLUMN)]
    id_column: String,

    /// Column whose text gets embedded
    #[arg(long, default_value = "abstract")]
    text_column: String,

    /// Column stored as title metadata; empty to skip
    #[arg(long, default_value = "title")]
    title_column: String,

    /// Only index the first N rows
    #[arg(long)]
    limit: Option<usize>,

    /// Vectors per upsert request
    #[arg(long, env = "ABSTRACT_SEARCH_UPSERT_BATCH", default_value_t = DEFAULT_UPSERT_BATCH)]
    batch_size: usize,

    /// Texts per encoder forward pass
    #[arg(long, default_value_t = 64)]
    encode_batch_size: usize,

    /// Directory the encoder model is cached in
    #[arg(long, env = "ABSTRACT_SEARCH_MODEL_CACHE")]
    model_cache: Option<PathBuf>,

    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: String,

    /// Index to create or reuse
    #[arg(long, env = "ABSTRACT_SEARCH_INDEX", default_value = DEFAULT_INDEX_NAME)]
    index_name: String,

    /// Optional namespace inside the index
    #[arg(long, env = "ABSTRACT_SEARCH_NAMESPACE")]
    namespace: Option<String>,

    /// Serverless cloud for a new index
    #[arg(long, default_value = "aws")]
    cloud: String,

    /// Serverless region for a new index
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Seconds between readiness polls
    #[arg(long, default_value_t = 1)]
    poll_secs: u64,

    /// Give up waiting for readiness after this many seconds
    #[arg(long, default_value_t = 300)]
    max_wait_secs: u64,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Attempts per HTTP request
    #[arg(long, default_value_t = 5)]
    max_retries: usize,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = IndexerCli::parse();
    logging::init(cli.verbose);

    let table = cli
        .table
        .clone()
        .unwrap_or_else(|| cli.data_dir.join(FULL_TABLE_FILE));
    let columns = CorpusColumns {
        id: cli.id_column.clone(),
        text: cli.text_column.clone(),
        title: Some(cli.title_column.clone()).filter(|name| !name.is_empty()),
    };

    let encoder = Arc::new(LocalEncoder::new(
        cli.model_cache.clone(),
        cli.encode_batch_size,
        true,
    )?);

    let settings = PineconeSettings {
        api_key: cli.pinecone_api_key.clone(),
        timeout: Duration::from_secs(cli.timeout_secs.max(1)),
        max_retries: cli.max_retries,
    };
    let control = PineconeControl::new(&settings)?;
    let spec = IndexSpec {
        cloud: cli.cloud.clone(),
        region: cli.region.clone(),
        ..IndexSpec::serverless(&cli.index_name, encoder.dimension())
    };
    let policy = ReadinessPolicy {
        interval: Duration::from_secs(cli.poll_secs),
        max_wait: Duration::from_secs(cli.max_wait_secs),
    };
    let description = ensure_index(&control, &spec, &policy)?;
    let index = Arc::new(control.open_index(&settings, &description, cli.namespace.clone())?);

    let rows = CorpusRowReader::open(&table, columns)
        .with_context(|| format!("failed to open corpus table {}", table.display()))?;
    let model = SemanticModel::new(encoder, index, 0);
    let stats = match cli.limit {
        Some(limit) => model.index_corpus(rows.take(limit), cli.batch_size)?,
        None => model.index_corpus(rows, cli.batch_size)?,
    };

    println!(
        "indexed {} rows into {} ({} upserted in {} requests)",
        stats.rows, description.name, stats.upserted, stats.batches
    );
    Ok(())
}

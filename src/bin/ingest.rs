use std::path::PathBuf;

use abstract_search::ingest::{self, IngestConfig, DEFAULT_NUM_BATCHES};
use abstract_search::logging;
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "abstract-ingest",
    about = "Split the arXiv JSONL dump into columnar batch files and consolidate them"
)]
struct IngestCli {
    /// Newline-delimited JSON metadata dump
    #[arg(
        long,
        env = "ABSTRACT_SEARCH_INPUT",
        default_value = "arxiv-metadata-oai-snapshot.json"
    )]
    input: PathBuf,

    /// Directory for batch files and consolidated tables
    #[arg(long, env = "ABSTRACT_SEARCH_DATA_DIR", default_value = "temp")]
    output_dir: PathBuf,

    /// Number of batches the input is split into
    #[arg(long, env = "ABSTRACT_SEARCH_NUM_BATCHES", default_value_t = DEFAULT_NUM_BATCHES)]
    num_batches: usize,

    /// Only write the identifier table, not the full one
    #[arg(long, default_value_t = false)]
    small_only: bool,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = IngestCli::parse();
    logging::init(cli.verbose);

    let config = IngestConfig {
        input: cli.input,
        output_dir: cli.output_dir,
        num_batches: cli.num_batches,
        write_full: !cli.small_only,
    };
    let summary = ingest::run(&config)?;

    println!(
        "ingested {} records into {} batches",
        summary.records,
        summary.batches.len()
    );
    if let Some(full) = &summary.tables.full_path {
        println!("full table:  {} ({} columns)", full.display(), summary.tables.columns);
    }
    println!("small table: {}", summary.tables.small_path.display());
    Ok(())
}

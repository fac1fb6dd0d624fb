//! Columnar ingestion of the arXiv metadata dump and semantic search over its
//! abstracts.

pub mod columnar;
pub mod corpus;
pub mod encoder;
mod http;
pub mod ingest;
pub mod logging;
pub mod papers;
pub mod search;
pub mod semantic;
pub mod server;
pub mod ui;
pub mod vector_index;

pub use columnar::{CorpusColumns, CorpusRow, CorpusRowReader, IdLookup};
pub use corpus::{BatchPlan, FlatBatch};
pub use encoder::{LocalEncoder, TextEncoder};
pub use ingest::{IngestConfig, IngestSummary};
pub use papers::{ArxivClient, Paper, PaperSource};
pub use search::{RankedPaper, SearchConfig, SearchOutcome, SearchResults, SearchService};
pub use semantic::{IndexingStats, SemanticModel};
pub use vector_index::{
    ensure_index, IndexControl, IndexSpec, QueryMatch, ReadinessPolicy, VectorIndex,
};

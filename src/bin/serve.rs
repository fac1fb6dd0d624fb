use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use abstract_search::columnar::IdLookup;
use abstract_search::encoder::LocalEncoder;
use abstract_search::ingest::SMALL_TABLE_FILE;
use abstract_search::logging;
use abstract_search::papers::{ArxivClient, ARXIV_API_URL, KEYWORD_RESULTS};
use abstract_search::search::{SearchConfig, SearchService};
use abstract_search::semantic::{SemanticModel, DEFAULT_TOP_K};
use abstract_search::server::{self, AppState};
use abstract_search::vector_index::pinecone::{PineconeControl, PineconeIndex, PineconeSettings};
use abstract_search::vector_index::{IndexControl, DEFAULT_INDEX_NAME};
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "abstract-serve",
    about = "Web UI for semantic and keyword search over arXiv abstracts"
)]
struct ServeCli {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "ABSTRACT_SEARCH_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Identifier table (defaults to <data-dir>/arxiv_all_small.parquet)
    #[arg(long, env = "ABSTRACT_SEARCH_IDS")]
    ids: Option<PathBuf>,

    /// Directory written by abstract-ingest
    #[arg(long, env = "ABSTRACT_SEARCH_DATA_DIR", default_value = "temp")]
    data_dir: PathBuf,

    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: String,

    /// Index to query
    #[arg(long, env = "ABSTRACT_SEARCH_INDEX", default_value = DEFAULT_INDEX_NAME)]
    index_name: String,

    /// Index host; looked up through the control plane when omitted
    #[arg(long, env = "ABSTRACT_SEARCH_INDEX_HOST")]
    index_host: Option<String>,

    /// Optional namespace inside the index
    #[arg(long, env = "ABSTRACT_SEARCH_NAMESPACE")]
    namespace: Option<String>,

    /// Directory the encoder model is cached in
    #[arg(long, env = "ABSTRACT_SEARCH_MODEL_CACHE")]
    model_cache: Option<PathBuf>,

    /// Semantic results per query
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Largest top_k accepted by the JSON API
    #[arg(long, default_value_t = 50)]
    max_top_k: usize,

    /// Keyword results per query
    #[arg(long, default_value_t = KEYWORD_RESULTS)]
    keyword_results: usize,

    /// Hide the arXiv keyword search column
    #[arg(long, default_value_t = false)]
    no_keyword_search: bool,

    /// Memo cache entries per stage; 0 keeps everything
    #[arg(long, env = "ABSTRACT_SEARCH_CACHE_SIZE", default_value_t = 0)]
    cache_size: usize,

    /// arXiv API endpoint
    #[arg(long, env = "ABSTRACT_SEARCH_ARXIV_URL", default_value = ARXIV_API_URL)]
    arxiv_url: String,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Attempts per HTTP request
    #[arg(long, default_value_t = 3)]
    max_retries: usize,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = ServeCli::parse();
    logging::init(cli.verbose);

    // Blocking HTTP clients are built and finally dropped outside the runtime.
    let service = Arc::new(build_service(&cli)?);
    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let state = AppState::new(Arc::clone(&service), cli.max_top_k);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!("abstract-serve listening on http://{addr}");
        axum::serve(listener, server::router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server shutdown")
    })?;
    drop(runtime);
    drop(service);
    Ok(())
}

fn build_service(cli: &ServeCli) -> Result<SearchService> {
    let ids_path = cli
        .ids
        .clone()
        .unwrap_or_else(|| cli.data_dir.join(SMALL_TABLE_FILE));
    let ids = IdLookup::load(&ids_path)
        .with_context(|| format!("failed to load id table {}", ids_path.display()))?;
    tracing::info!(rows = ids.len(), path = %ids_path.display(), "id table loaded");

    let encoder = Arc::new(LocalEncoder::new(cli.model_cache.clone(), 32, false)?);

    let settings = PineconeSettings {
        api_key: cli.pinecone_api_key.clone(),
        timeout: Duration::from_secs(cli.timeout_secs.max(1)),
        max_retries: cli.max_retries,
    };
    let host = match &cli.index_host {
        Some(host) => host.clone(),
        None => {
            let control = PineconeControl::new(&settings)?;
            let description = control
                .describe(&cli.index_name)?
                .with_context(|| format!("index {} does not exist", cli.index_name))?;
            anyhow::ensure!(description.ready, "index {} is not ready", cli.index_name);
            description.host
        }
    };
    let index = Arc::new(PineconeIndex::new(&settings, &host, cli.namespace.clone())?);
    tracing::info!(index = %cli.index_name, endpoint = index.endpoint(), "vector index connected");

    let papers = Arc::new(ArxivClient::new(
        &cli.arxiv_url,
        Duration::from_secs(cli.timeout_secs.max(1)),
        cli.max_retries,
    )?);
    let config = SearchConfig {
        top_k: cli.top_k.max(1),
        keyword_results: cli.keyword_results,
        keyword_search: !cli.no_keyword_search,
    };
    let semantic = SemanticModel::new(encoder, index, cli.cache_size);
    tracing::info!(
        model = semantic.encoder().model_name(),
        dimension = semantic.encoder().dimension(),
        top_k = config.top_k,
        keyword_search = config.keyword_search,
        "search service ready"
    );
    Ok(SearchService::new(semantic, ids, papers, config))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

//! HTTP surface: the HTML search page plus a small JSON API.

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::search::{RankedPaper, SearchOutcome, SearchService};
use crate::ui::{self, PageBody};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: Arc<SearchService>,
    max_top_k: usize,
}

impl AppState {
    pub fn new(service: Arc<SearchService>, max_top_k: usize) -> Self {
        Self {
            service,
            max_top_k: max_top_k.max(1),
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/search", get(search_page))
        .route("/v1/query", post(query_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    results: Vec<ApiResult>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ApiResult {
    rank: usize,
    score: f32,
    row: usize,
    id: String,
    url: String,
    title: String,
    authors: Vec<String>,
    summary: String,
}

impl From<RankedPaper> for ApiResult {
    fn from(hit: RankedPaper) -> Self {
        Self {
            rank: hit.rank,
            score: hit.score,
            row: hit.row,
            id: hit.paper.short_id().to_string(),
            url: hit.paper.id,
            title: hit.paper.title,
            authors: hit.paper.authors,
            summary: hit.paper.summary,
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    top_k: usize,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn index_page() -> Html<String> {
    Html(ui::render_page("", PageBody::Blank))
}

async fn search_page(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Html<String> {
    let query = params.q;
    let service = Arc::clone(&state.service);
    let owned = query.clone();
    let outcome = tokio::task::spawn_blocking(move || service.search(&owned))
        .await
        .map_err(|err| anyhow!("search task failed: {err}"))
        .and_then(|result| result);
    match outcome {
        Ok(outcome) => Html(ui::render_page(&query, PageBody::Outcome(&outcome))),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "search failed");
            let message = format!("Search failed: {err}");
            Html(ui::render_page(&query, PageBody::Failure(&message)))
        }
    }
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<ErrorBody>)> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    let top_k = request
        .top_k
        .unwrap_or(state.service.config().top_k)
        .clamp(1, state.max_top_k);
    let start = Instant::now();
    let service = Arc::clone(&state.service);
    let hits = tokio::task::spawn_blocking(move || service.semantic_search(&request.query, top_k))
        .await
        .map_err(|err| internal_error(anyhow!("search task failed: {err}")))?
        .map_err(internal_error)?;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    tracing::info!(top_k, results = hits.len(), latency_ms, "api query served");
    Ok(Json(QueryResponse {
        results: hits.into_iter().map(ApiResult::from).collect(),
        meta: ResponseMeta { top_k, latency_ms },
    }))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}

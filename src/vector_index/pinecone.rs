//! Pinecone REST clients for the control plane and an index's data plane.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{IndexControl, IndexDescription, IndexSpec, IndexedVector, Metric, QueryMatch, VectorIndex};
use crate::http::{ensure_success, send_with_retry};

/// Control-plane endpoint.
pub const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";

/// REST API version pinned on every request.
pub const API_VERSION: &str = "2024-07";

/// Connection settings shared by both clients.
#[derive(Debug, Clone)]
pub struct PineconeSettings {
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: usize,
}

fn build_client(settings: &PineconeSettings) -> Result<Client> {
    anyhow::ensure!(!settings.api_key.trim().is_empty(), "missing Pinecone API key");
    let mut headers = HeaderMap::new();
    headers.insert(
        "Api-Key",
        HeaderValue::from_str(settings.api_key.trim()).context("invalid Pinecone API key")?,
    );
    headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Client::builder()
        .timeout(settings.timeout)
        .default_headers(headers)
        .build()
        .context("failed to build Pinecone HTTP client")
}

/// Blocking client for `api.pinecone.io`.
#[derive(Clone)]
pub struct PineconeControl {
    client: Client,
    base_url: String,
    max_retries: usize,
}

impl PineconeControl {
    /// Builds a control-plane client against [`CONTROL_PLANE_URL`].
    pub fn new(settings: &PineconeSettings) -> Result<Self> {
        Self::with_base_url(settings, CONTROL_PLANE_URL)
    }

    /// Builds a control-plane client against a custom endpoint.
    pub fn with_base_url(settings: &PineconeSettings, base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(settings)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: settings.max_retries.max(1),
        })
    }

    /// Opens the data plane of a described index.
    pub fn open_index(
        &self,
        settings: &PineconeSettings,
        description: &IndexDescription,
        namespace: Option<String>,
    ) -> Result<PineconeIndex> {
        PineconeIndex::new(settings, &description.host, namespace)
    }
}

impl IndexControl for PineconeControl {
    fn describe(&self, name: &str) -> Result<Option<IndexDescription>> {
        let url = format!("{}/indexes/{}", self.base_url, name);
        let resp = send_with_retry("Pinecone describe_index", self.max_retries, || {
            self.client.get(&url)
        })?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: DescribeResponse = ensure_success("Pinecone describe_index", resp)?
            .json()
            .context("failed to parse Pinecone index description")?;
        Ok(Some(parsed.into()))
    }

    fn create(&self, spec: &IndexSpec) -> Result<()> {
        let url = format!("{}/indexes", self.base_url);
        let request = CreateIndexRequest::from(spec);
        let resp = send_with_retry("Pinecone create_index", self.max_retries, || {
            self.client.post(&url).json(&request)
        })?;
        if resp.status() == StatusCode::CONFLICT {
            tracing::warn!(index = %spec.name, "index was created concurrently");
            return Ok(());
        }
        ensure_success("Pinecone create_index", resp)?;
        Ok(())
    }
}

/// Blocking client for one index host.
#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    endpoint: String,
    namespace: Option<String>,
    max_retries: usize,
}

impl PineconeIndex {
    /// Builds a data-plane client; `host` may omit the scheme.
    pub fn new(settings: &PineconeSettings, host: &str, namespace: Option<String>) -> Result<Self> {
        anyhow::ensure!(!host.trim().is_empty(), "missing Pinecone index host");
        let host = host.trim().trim_end_matches('/');
        let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        };
        Ok(Self {
            client: build_client(settings)?,
            endpoint,
            namespace: namespace.filter(|ns| !ns.is_empty()),
            max_retries: settings.max_retries.max(1),
        })
    }

    /// Base URL of the data plane.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl VectorIndex for PineconeIndex {
    fn query(&self, vector: &[f32], top_k: usize, include_metadata: bool) -> Result<Vec<QueryMatch>> {
        let url = format!("{}/query", self.endpoint);
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata,
            include_values: false,
            namespace: self.namespace.as_deref(),
        };
        let resp = send_with_retry("Pinecone query", self.max_retries, || {
            self.client.post(&url).json(&request)
        })?;
        let parsed: QueryResponse = ensure_success("Pinecone query", resp)?
            .json()
            .context("failed to parse Pinecone query response")?;
        Ok(parsed.matches)
    }

    fn upsert(&self, vectors: &[IndexedVector]) -> Result<usize> {
        if vectors.is_empty() {
            return Ok(0);
        }
        let url = format!("{}/vectors/upsert", self.endpoint);
        let request = UpsertRequest {
            vectors,
            namespace: self.namespace.as_deref(),
        };
        let resp = send_with_retry("Pinecone upsert", self.max_retries, || {
            self.client.post(&url).json(&request)
        })?;
        let parsed: UpsertResponse = ensure_success("Pinecone upsert", resp)?
            .json()
            .context("failed to parse Pinecone upsert response")?;
        Ok(parsed.upserted_count)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [IndexedVector],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: Metric,
    spec: ServerlessSpec<'a>,
}

#[derive(Serialize)]
struct ServerlessSpec<'a> {
    serverless: CloudRegion<'a>,
}

#[derive(Serialize)]
struct CloudRegion<'a> {
    cloud: &'a str,
    region: &'a str,
}

impl<'a> From<&'a IndexSpec> for CreateIndexRequest<'a> {
    fn from(spec: &'a IndexSpec) -> Self {
        Self {
            name: &spec.name,
            dimension: spec.dimension,
            metric: spec.metric,
            spec: ServerlessSpec {
                serverless: CloudRegion {
                    cloud: &spec.cloud,
                    region: &spec.region,
                },
            },
        }
    }
}

#[derive(Deserialize)]
struct DescribeResponse {
    name: String,
    dimension: usize,
    metric: Metric,
    #[serde(default)]
    host: String,
    status: StatusBody,
}

#[derive(Deserialize)]
struct StatusBody {
    ready: bool,
    #[serde(default)]
    state: String,
}

impl From<DescribeResponse> for IndexDescription {
    fn from(resp: DescribeResponse) -> Self {
        Self {
            name: resp.name,
            dimension: resp.dimension,
            metric: resp.metric,
            host: resp.host,
            ready: resp.status.ready,
            state: resp.status.state,
        }
    }
}

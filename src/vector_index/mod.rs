//! Hosted vector index: query and upsert traits plus index provisioning.

pub mod pinecone;

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use pinecone::{PineconeControl, PineconeIndex};

/// Index name used when none is configured.
pub const DEFAULT_INDEX_NAME: &str = "arxiv-semantic-search";

/// One scored hit returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    /// Identifier the vector was stored under (the corpus row position).
    pub id: String,
    /// Similarity score; higher is closer.
    pub score: f32,
    /// Stored metadata, present when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// A vector to store in the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedVector {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// Query and write access to one index.
pub trait VectorIndex: Send + Sync {
    /// Returns up to `top_k` nearest vectors.
    fn query(&self, vector: &[f32], top_k: usize, include_metadata: bool) -> Result<Vec<QueryMatch>>;

    /// Stores `vectors`, returning how many the index accepted.
    fn upsert(&self, vectors: &[IndexedVector]) -> Result<usize>;
}

/// Distance function of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
    Dotproduct,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dotproduct => "dotproduct",
        };
        f.write_str(name)
    }
}

/// Parameters used to create a serverless index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub cloud: String,
    pub region: String,
}

impl IndexSpec {
    /// Cosine index on AWS `us-east-1`.
    pub fn serverless(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric: Metric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Current state of an existing index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescription {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    /// Data-plane host serving queries and upserts.
    pub host: String,
    pub ready: bool,
    pub state: String,
}

/// Control-plane operations on a project's indexes.
pub trait IndexControl: Send + Sync {
    /// Describes `name`, or `None` when no such index exists.
    fn describe(&self, name: &str) -> Result<Option<IndexDescription>>;

    /// Requests creation of a new index.
    fn create(&self, spec: &IndexSpec) -> Result<()>;
}

/// How long and how often [`ensure_index`] polls for readiness.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Creates the index if it is missing and blocks until it reports ready.
///
/// An existing index is reused as long as its dimension matches `spec`.
pub fn ensure_index(
    control: &dyn IndexControl,
    spec: &IndexSpec,
    policy: &ReadinessPolicy,
) -> Result<IndexDescription> {
    match control.describe(&spec.name)? {
        Some(existing) => {
            anyhow::ensure!(
                existing.dimension == spec.dimension,
                "index {} has dimension {}, expected {}",
                existing.name,
                existing.dimension,
                spec.dimension
            );
            if existing.metric != spec.metric {
                tracing::warn!(
                    index = %existing.name,
                    metric = %existing.metric,
                    expected = %spec.metric,
                    "existing index uses a different metric"
                );
            }
            if existing.ready {
                tracing::info!(index = %existing.name, host = %existing.host, "using existing index");
                return Ok(existing);
            }
        }
        None => {
            tracing::info!(
                index = %spec.name,
                dimension = spec.dimension,
                metric = %spec.metric,
                cloud = %spec.cloud,
                region = %spec.region,
                "creating index"
            );
            control.create(spec)?;
        }
    }

    let start = Instant::now();
    loop {
        match control.describe(&spec.name)? {
            Some(description) if description.ready => {
                tracing::info!(
                    index = %description.name,
                    waited_ms = start.elapsed().as_millis() as u64,
                    "index ready"
                );
                return Ok(description);
            }
            Some(description) => {
                tracing::debug!(index = %spec.name, state = %description.state, "waiting for index");
            }
            None => tracing::debug!(index = %spec.name, "index not visible yet"),
        }
        anyhow::ensure!(
            start.elapsed() < policy.max_wait,
            "index {} not ready after {:?}",
            spec.name,
            policy.max_wait
        );
        thread::sleep(policy.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedControl {
        existing: Mutex<Option<IndexDescription>>,
        polls_until_ready: Mutex<usize>,
        created: Mutex<Vec<IndexSpec>>,
    }

    impl ScriptedControl {
        fn new(existing: Option<IndexDescription>, polls_until_ready: usize) -> Self {
            Self {
                existing: Mutex::new(existing),
                polls_until_ready: Mutex::new(polls_until_ready),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    impl IndexControl for ScriptedControl {
        fn describe(&self, _name: &str) -> Result<Option<IndexDescription>> {
            let mut existing = self.existing.lock().unwrap();
            let mut remaining = self.polls_until_ready.lock().unwrap();
            if let Some(description) = existing.as_mut() {
                if *remaining == 0 {
                    description.ready = true;
                    description.state = "Ready".to_string();
                } else {
                    *remaining -= 1;
                }
            }
            Ok(existing.clone())
        }

        fn create(&self, spec: &IndexSpec) -> Result<()> {
            self.created.lock().unwrap().push(spec.clone());
            *self.existing.lock().unwrap() = Some(description(&spec.name, spec.dimension, false));
            Ok(())
        }
    }

    fn description(name: &str, dimension: usize, ready: bool) -> IndexDescription {
        IndexDescription {
            name: name.to_string(),
            dimension,
            metric: Metric::Cosine,
            host: format!("{name}-abc.svc.pinecone.io"),
            ready,
            state: if ready { "Ready" } else { "Initializing" }.to_string(),
        }
    }

    fn fast_policy() -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::ZERO,
            max_wait: Duration::from_secs(5),
        }
    }

    #[test]
    fn creates_missing_index_and_waits_until_ready() {
        let control = ScriptedControl::new(None, 3);
        let spec = IndexSpec::serverless(DEFAULT_INDEX_NAME, 384);
        let ready = ensure_index(&control, &spec, &fast_policy()).expect("ensure");
        assert!(ready.ready);
        assert_eq!(ready.host, "arxiv-semantic-search-abc.svc.pinecone.io");
        assert_eq!(control.created.lock().unwrap().as_slice(), &[spec]);
    }

    #[test]
    fn reuses_ready_index_without_creating() {
        let control = ScriptedControl::new(Some(description("papers", 384, true)), 0);
        let spec = IndexSpec::serverless("papers", 384);
        ensure_index(&control, &spec, &fast_policy()).expect("ensure");
        assert!(control.created.lock().unwrap().is_empty());
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let control = ScriptedControl::new(Some(description("papers", 768, true)), 0);
        let spec = IndexSpec::serverless("papers", 384);
        let err = ensure_index(&control, &spec, &fast_policy()).expect_err("mismatch");
        assert!(err.to_string().contains("dimension 768"), "{err}");
    }

    #[test]
    fn gives_up_after_max_wait() {
        let control = ScriptedControl::new(None, usize::MAX);
        let spec = IndexSpec::serverless("papers", 384);
        let policy = ReadinessPolicy {
            interval: Duration::from_millis(1),
            max_wait: Duration::from_millis(20),
        };
        let err = ensure_index(&control, &spec, &policy).expect_err("timeout");
        assert!(err.to_string().contains("not ready"), "{err}");
    }

    #[test]
    fn metric_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Metric::Dotproduct).unwrap(), "\"dotproduct\"");
        assert_eq!(Metric::Cosine.to_string(), "cosine");
    }
}

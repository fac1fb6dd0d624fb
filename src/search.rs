//! Query orchestration: the semantic path and the optional keyword path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::columnar::IdLookup;
use crate::papers::{Paper, PaperSource, KEYWORD_RESULTS};
use crate::semantic::{SemanticModel, DEFAULT_TOP_K};

/// Tunables of a [`SearchService`].
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    /// Semantic neighbours per query.
    pub top_k: usize,
    /// Keyword results per query.
    pub keyword_results: usize,
    /// Whether the keyword column is produced at all.
    pub keyword_search: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            keyword_results: KEYWORD_RESULTS,
            keyword_search: true,
        }
    }
}

/// A semantic hit resolved to paper metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPaper {
    /// 1-based rank in the semantic list.
    pub rank: usize,
    pub score: f32,
    /// Row position in the corpus tables.
    pub row: usize,
    pub paper: Paper,
}

/// Both result lists for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    pub query: String,
    /// `None` when keyword search is disabled.
    pub keyword: Option<Vec<Paper>>,
    pub semantic: Vec<RankedPaper>,
    pub elapsed: Duration,
}

/// What a query produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Blank input; nothing was searched.
    EmptyQuery,
    Results(SearchResults),
}

/// Ties the semantic model, the row → id table and the metadata source.
pub struct SearchService {
    semantic: SemanticModel,
    ids: IdLookup,
    papers: Arc<dyn PaperSource>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        semantic: SemanticModel,
        ids: IdLookup,
        papers: Arc<dyn PaperSource>,
        config: SearchConfig,
    ) -> Self {
        Self {
            semantic,
            ids,
            papers,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs both searches for `query`.
    pub fn search(&self, query: &str) -> Result<SearchOutcome> {
        if query.trim().is_empty() {
            return Ok(SearchOutcome::EmptyQuery);
        }
        let start = Instant::now();
        let keyword = if self.config.keyword_search {
            Some(
                self.papers
                    .search(query, self.config.keyword_results)
                    .context("keyword search failed")?,
            )
        } else {
            None
        };
        let semantic = self.semantic_search(query, self.config.top_k)?;
        let elapsed = start.elapsed();
        tracing::info!(
            keyword = keyword.as_ref().map(Vec::len),
            semantic = semantic.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "search served"
        );
        Ok(SearchOutcome::Results(SearchResults {
            query: query.to_string(),
            keyword,
            semantic,
            elapsed,
        }))
    }

    /// Semantic neighbours of `query`, resolved to papers, best first.
    ///
    /// Hits whose paper the metadata source does not return are dropped.
    pub fn semantic_search(&self, query: &str, top_k: usize) -> Result<Vec<RankedPaper>> {
        let matches = self.semantic.results(query, top_k)?;
        let mut hits = Vec::with_capacity(matches.len());
        for found in &matches {
            let row: usize = found
                .id
                .parse()
                .with_context(|| format!("index returned non-numeric id {:?}", found.id))?;
            anyhow::ensure!(
                row < self.ids.len(),
                "index returned row {} but the id table has {} rows",
                row,
                self.ids.len()
            );
            let arxiv_id = self
                .ids
                .get(row)
                .ok_or_else(|| anyhow!("row {row} has no identifier in the id table"))?;
            hits.push((row, found.score, arxiv_id.to_string()));
        }

        let ids: Vec<String> = hits.iter().map(|(_, _, id)| id.clone()).collect();
        let mut papers = self
            .papers
            .fetch(&ids)
            .context("paper lookup failed")?;

        let mut ranked = Vec::with_capacity(hits.len());
        for (row, score, arxiv_id) in hits {
            let wanted = arxiv_feed::strip_version(&arxiv_id);
            match papers.iter().position(|paper| paper.short_id() == wanted) {
                Some(pos) => ranked.push(RankedPaper {
                    rank: ranked.len() + 1,
                    score,
                    row,
                    paper: papers.remove(pos),
                }),
                None => tracing::warn!(%arxiv_id, row, "no metadata returned for paper"),
            }
        }
        Ok(ranked)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned metadata source keyed by bare arXiv id.
    #[derive(Default)]
    pub struct CannedPapers {
        pub catalog: Vec<Paper>,
        pub searches: AtomicUsize,
        pub fetches: AtomicUsize,
    }

    impl CannedPapers {
        pub fn with_ids(ids: &[&str]) -> Self {
            Self {
                catalog: ids
                    .iter()
                    .map(|id| Paper {
                        id: format!("http://arxiv.org/abs/{id}v1"),
                        title: format!("Paper {id}"),
                        summary: format!("Abstract of {id}."),
                        authors: vec!["A. Author".to_string(), "B. Author".to_string()],
                        ..Paper::default()
                    })
                    .collect(),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.searches.load(Ordering::SeqCst) + self.fetches.load(Ordering::SeqCst)
        }
    }

    impl PaperSource for CannedPapers {
        fn search(&self, _term: &str, max_results: usize) -> Result<Vec<Paper>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(self.catalog.iter().take(max_results).cloned().collect())
        }

        fn fetch(&self, ids: &[String]) -> Result<Vec<Paper>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            // Reverse order, so callers must not rely on the source's ordering.
            Ok(self
                .catalog
                .iter()
                .rev()
                .filter(|paper| ids.iter().any(|id| id == paper.short_id()))
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CannedPapers;
    use super::*;
    use crate::semantic::testing::{CountingEncoder, MemoryIndex};
    use pretty_assertions::assert_eq;

    struct Fixture {
        service: SearchService,
        encoder: Arc<CountingEncoder>,
        index: Arc<MemoryIndex>,
        papers: Arc<CannedPapers>,
    }

    fn fixture(config: SearchConfig) -> Fixture {
        let encoder = Arc::new(CountingEncoder::default());
        let index = Arc::new(MemoryIndex::with_vectors(vec![
            (0, vec![0.1, 0.0, 0.0, 0.0]),
            (1, vec![0.3, 0.0, 0.0, 0.0]),
            (2, vec![0.2, 0.0, 0.0, 0.0]),
        ]));
        let papers = Arc::new(CannedPapers::with_ids(&["0704.0001", "0704.0002", "0704.0003"]));
        let ids = IdLookup::from_ids(["0704.0001", "0704.0002", "0704.0003"]);
        let semantic = SemanticModel::new(encoder.clone(), index.clone(), 0);
        Fixture {
            service: SearchService::new(semantic, ids, papers.clone(), config),
            encoder,
            index,
            papers,
        }
    }

    #[test]
    fn blank_queries_touch_nothing() {
        let fx = fixture(SearchConfig::default());
        for query in ["", "   ", "\t\n"] {
            assert_eq!(fx.service.search(query).unwrap(), SearchOutcome::EmptyQuery);
        }
        assert_eq!(fx.encoder.calls(), 0);
        assert_eq!(fx.index.queries(), 0);
        assert_eq!(fx.papers.calls(), 0);
    }

    #[test]
    fn semantic_hits_keep_rank_and_resolve_ids() {
        let fx = fixture(SearchConfig::default());
        let SearchOutcome::Results(results) = fx.service.search("quantum").unwrap() else {
            panic!("expected results");
        };
        let ranked: Vec<(usize, usize, &str)> = results
            .semantic
            .iter()
            .map(|hit| (hit.rank, hit.row, hit.paper.short_id()))
            .collect();
        assert_eq!(
            ranked,
            vec![(1, 1, "0704.0002"), (2, 2, "0704.0003"), (3, 0, "0704.0001")]
        );
        assert_eq!(results.keyword.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn keyword_path_can_be_disabled() {
        let fx = fixture(SearchConfig {
            keyword_search: false,
            ..SearchConfig::default()
        });
        let SearchOutcome::Results(results) = fx.service.search("quantum").unwrap() else {
            panic!("expected results");
        };
        assert!(results.keyword.is_none());
        assert_eq!(fx.papers.searches.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn top_k_limits_semantic_hits() {
        let fx = fixture(SearchConfig {
            top_k: 2,
            ..SearchConfig::default()
        });
        let hits = fx.service.semantic_search("quantum", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn out_of_range_row_is_an_error() {
        let encoder = Arc::new(CountingEncoder::default());
        let index = Arc::new(MemoryIndex::with_vectors(vec![(7, vec![1.0, 0.0, 0.0, 0.0])]));
        let semantic = SemanticModel::new(encoder, index, 0);
        let service = SearchService::new(
            semantic,
            IdLookup::from_ids(["0704.0001"]),
            Arc::new(CannedPapers::default()),
            SearchConfig::default(),
        );
        let err = service.semantic_search("anything", 10).unwrap_err();
        assert!(err.to_string().contains("row 7"), "{err}");
    }

    #[test]
    fn null_identifier_is_not_reported_as_out_of_range() {
        let encoder = Arc::new(CountingEncoder::default());
        let index = Arc::new(MemoryIndex::with_vectors(vec![(1, vec![1.0, 0.0, 0.0, 0.0])]));
        let semantic = SemanticModel::new(encoder, index, 0);
        let ids: IdLookup = vec![Some("0704.0001".to_string()), None].into_iter().collect();
        let service = SearchService::new(
            semantic,
            ids,
            Arc::new(CannedPapers::default()),
            SearchConfig::default(),
        );
        let err = service.semantic_search("anything", 10).unwrap_err();
        assert_eq!(err.to_string(), "row 1 has no identifier in the id table");
    }
}

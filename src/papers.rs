//! Paper metadata from the arXiv export API.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use url::Url;

use crate::http::{ensure_success, send_with_retry};

pub use arxiv_feed::Entry as Paper;

/// Public arXiv query endpoint.
pub const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";

/// Results shown by the keyword column.
pub const KEYWORD_RESULTS: usize = 10;

/// Source of paper metadata.
pub trait PaperSource: Send + Sync {
    /// Keyword search over abstracts, most relevant first.
    fn search(&self, term: &str, max_results: usize) -> Result<Vec<Paper>>;

    /// Looks up papers by arXiv id, returned in the order of `ids`.
    fn fetch(&self, ids: &[String]) -> Result<Vec<Paper>>;
}

/// Blocking arXiv API client.
#[derive(Clone)]
pub struct ArxivClient {
    client: Client,
    base_url: String,
    max_retries: usize,
}

impl ArxivClient {
    /// Builds a client against `base_url` (usually [`ARXIV_API_URL`]).
    pub fn new(base_url: &str, timeout: Duration, max_retries: usize) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("invalid arXiv API URL {base_url:?}"))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build arXiv HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            max_retries: max_retries.max(1),
        })
    }

    /// URL of an abstract keyword search.
    pub fn search_url(&self, term: &str, max_results: usize) -> Result<Url> {
        let max_results = max_results.to_string();
        Url::parse_with_params(
            &self.base_url,
            &[
                ("search_query", search_expression(term).as_str()),
                ("sortBy", "relevance"),
                ("start", "0"),
                ("max_results", max_results.as_str()),
            ],
        )
        .context("failed to build arXiv search URL")
    }

    /// URL of an id-list lookup.
    pub fn lookup_url(&self, ids: &[String]) -> Result<Url> {
        let max_results = ids.len().to_string();
        Url::parse_with_params(
            &self.base_url,
            &[
                ("id_list", ids.join(",").as_str()),
                ("max_results", max_results.as_str()),
            ],
        )
        .context("failed to build arXiv lookup URL")
    }

    fn get_feed(&self, label: &str, url: Url) -> Result<Vec<Paper>> {
        tracing::debug!(%url, "{label}");
        let resp = send_with_retry(label, self.max_retries, || self.client.get(url.clone()))?;
        let body = ensure_success(label, resp)?
            .text()
            .with_context(|| format!("failed to read {label} response"))?;
        arxiv_feed::parse_feed(&body).with_context(|| format!("failed to parse {label} response"))
    }
}

impl PaperSource for ArxivClient {
    fn search(&self, term: &str, max_results: usize) -> Result<Vec<Paper>> {
        let url = self.search_url(term, max_results)?;
        let papers = self.get_feed("arXiv search", url)?;
        tracing::info!(results = papers.len(), "arXiv keyword search");
        Ok(papers)
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<Paper>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.lookup_url(ids)?;
        let papers = self.get_feed("arXiv lookup", url)?;
        Ok(order_by_ids(papers, ids))
    }
}

/// `search_query` value for a term. Single words go out as `ab:, word`, the
/// form the listing UI has always sent.
fn search_expression(term: &str) -> String {
    let term = term.trim();
    if term.contains(' ') {
        format!("ab:{term}")
    } else {
        format!("ab:, {term}")
    }
}

/// Reorders `papers` to follow `ids`; papers not asked for trail in feed order.
pub fn order_by_ids(papers: Vec<Paper>, ids: &[String]) -> Vec<Paper> {
    let mut remaining = papers;
    let mut ordered = Vec::with_capacity(remaining.len());
    for id in ids {
        let wanted = arxiv_feed::strip_version(id);
        if let Some(pos) = remaining.iter().position(|paper| paper.short_id() == wanted) {
            ordered.push(remaining.remove(pos));
        }
    }
    ordered.extend(remaining);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::StubServer;
    use pretty_assertions::assert_eq;

    const LOOKUP_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: id_list=0704.0001,0704.0002</title>
  <entry>
    <id>http://arxiv.org/abs/0704.0002v2</id>
    <title>Sparsity-certifying Graph
      Decompositions</title>
    <summary>  We describe a new algorithm.  </summary>
    <author><name>Ileana Streinu</name></author>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/0704.0001v2</id>
    <title>Calculation of prompt diphoton production</title>
    <summary>A fully differential calculation.</summary>
    <author><name>C. Balazs</name></author>
    <author><name>E. L. Berger</name></author>
  </entry>
</feed>"#;

    fn client() -> ArxivClient {
        ArxivClient::new(ARXIV_API_URL, Duration::from_secs(5), 1).unwrap()
    }

    fn paper(id: &str) -> Paper {
        Paper {
            id: format!("http://arxiv.org/abs/{id}"),
            title: id.to_string(),
            ..Paper::default()
        }
    }

    #[test]
    fn single_word_search_gets_comma_prefix() {
        let url = client().search_url("graphene", 10).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("search_query".to_string(), "ab:, graphene".to_string()),
                ("sortBy".to_string(), "relevance".to_string()),
                ("start".to_string(), "0".to_string()),
                ("max_results".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn multi_word_search_is_sent_as_is() {
        let url = client().search_url("dark matter halos", 10).unwrap();
        assert!(url.as_str().starts_with("https://export.arxiv.org/api/query?"));
        let query = url.query_pairs().next().unwrap().1.into_owned();
        assert_eq!(query, "ab:dark matter halos");
    }

    #[test]
    fn lookup_url_joins_ids() {
        let ids = vec!["0704.0001".to_string(), "hep-th/9901001".to_string()];
        let url = client().lookup_url(&ids).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("id_list".to_string(), "0704.0001,hep-th/9901001".to_string()));
        assert_eq!(pairs[1], ("max_results".to_string(), "2".to_string()));
    }

    #[test]
    fn fetch_of_nothing_makes_no_request() {
        let unreachable = ArxivClient::new("http://127.0.0.1:9/api/query", Duration::from_millis(50), 1).unwrap();
        assert!(unreachable.fetch(&[]).unwrap().is_empty());
    }

    #[test]
    fn reorders_feed_to_requested_ids() {
        let feed = vec![paper("0704.0003v1"), paper("0704.0001v2"), paper("0704.0009v1")];
        let ids = vec!["0704.0001".to_string(), "0704.0003".to_string()];
        let ordered: Vec<String> = order_by_ids(feed, &ids)
            .into_iter()
            .map(|p| p.short_id().to_string())
            .collect();
        assert_eq!(ordered, vec!["0704.0001", "0704.0003", "0704.0009"]);
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(ArxivClient::new("not a url", Duration::from_secs(1), 1).is_err());
    }

    #[test]
    fn fetch_parses_feed_in_requested_order() {
        let server = StubServer::start(vec![(200, LOOKUP_FEED.to_string())]);
        let client = ArxivClient::new(&format!("{}/api/query", server.url()), Duration::from_secs(5), 1).unwrap();
        let ids = vec!["0704.0001".to_string(), "0704.0002".to_string()];
        let papers = client.fetch(&ids).unwrap();

        let short: Vec<&str> = papers.iter().map(|p| p.short_id()).collect();
        assert_eq!(short, vec!["0704.0001", "0704.0002"]);
        assert_eq!(papers[0].authors, vec!["C. Balazs", "E. L. Berger"]);
        assert_eq!(papers[1].title, "Sparsity-certifying Graph Decompositions");
        assert_eq!(papers[1].summary, "We describe a new algorithm.");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert!(
            requests[0].path.starts_with("/api/query?id_list=0704.0001%2C0704.0002&max_results=2"),
            "{}",
            requests[0].path
        );
    }

    #[test]
    fn search_failure_carries_the_response_body() {
        let server = StubServer::start(vec![(400, "malformed search_query".to_string())]);
        let client = ArxivClient::new(&format!("{}/api/query", server.url()), Duration::from_secs(5), 3).unwrap();
        let err = client.search("graphene", 5).unwrap_err();
        assert!(err.to_string().contains("malformed search_query"), "{err}");
        assert_eq!(server.requests().len(), 1);
    }
}

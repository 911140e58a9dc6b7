//! Bibliographic search service clients.

pub mod arxiv;
pub mod crossref;

use async_trait::async_trait;
use paracite_common::ServiceError;

use crate::models::{CandidatePaper, KeywordSummary};
use crate::normalise::is_stop_word;

pub use arxiv::ArxivSource;
pub use crossref::CrossRefSource;

/// At most this many keywords go into one search query.
pub const MAX_QUERY_KEYWORDS: usize = 5;

/// Common interface for all bibliographic search services.
#[async_trait]
pub trait BibliographicSource: Send + Sync {
    /// One page of results, `page` 0-based.
    async fn search_page(
        &self,
        query: &SearchQuery,
        page: usize,
        page_size: usize,
    ) -> Result<SearchPage, ServiceError>;

    fn name(&self) -> &'static str;
}

/// One page from a search service. Records that could not be turned into a
/// [`CandidatePaper`] are dropped from `papers` but still counted in
/// `raw_count`, which alone decides whether more pages exist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub papers: Vec<CandidatePaper>,
    pub raw_count: usize,
}

impl SearchPage {
    /// A page in which every returned record was usable.
    pub fn complete(papers: Vec<CandidatePaper>) -> Self {
        let raw_count = papers.len();
        Self { papers, raw_count }
    }

    /// The service returned fewer records than asked for: nothing more to fetch.
    pub fn is_last(&self, page_size: usize) -> bool {
        self.raw_count < page_size
    }
}

/// Sanitised search terms derived from a [`KeywordSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Keyword phrases, OR-ed together by the sources.
    pub keywords: Vec<String>,
    /// Summary as free text.
    pub free_text: String,
}

impl SearchQuery {
    pub fn from_keywords(ks: &KeywordSummary) -> Self {
        let keywords = ks.keywords().iter()
            .map(|k| sanitize(k))
            .filter(|k| !k.is_empty())
            .take(MAX_QUERY_KEYWORDS)
            .collect();
        Self { keywords, free_text: sanitize(ks.summary()) }
    }

    /// Non-stop-word terms of the free text.
    pub fn free_text_terms(&self) -> Vec<&str> {
        self.free_text
            .split_whitespace()
            .filter(|w| w.chars().count() > 2 && !is_stop_word(&w.to_lowercase()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.free_text.is_empty()
    }
}

/// Keep letters, digits, whitespace and hyphens; collapse whitespace.
pub fn sanitize(text: &str) -> String {
    let kept: String = text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Status code handling shared by the HTTP sources.
pub(crate) fn status_error(source: &str, status: u16, body: &str) -> Option<ServiceError> {
    let snippet: String = body.chars().take(200).collect();
    match status {
        200..=299 => None,
        429 | 503 => Some(ServiceError::RateLimited(format!("{source} returned {status}"))),
        500..=599 => Some(ServiceError::Network(format!("{source} returned {status}: {snippet}"))),
        _ => Some(ServiceError::Schema(format!("{source} rejected query ({status}): {snippet}"))),
    }
}

pub(crate) fn transport_error(source: &str, e: reqwest::Error) -> ServiceError {
    ServiceError::Network(format!("{source}: {e}"))
}

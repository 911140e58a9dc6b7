//! Candidate retrieval: query construction, pagination, ordering,
//! deduplication and caching around a [`BibliographicSource`].

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use paracite_common::ServiceError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::cache::{canonical_query_key, RetrievalCache};
use crate::config::PipelineConfig;
use crate::limiter::ServiceLimiter;
use crate::models::{CandidatePaper, KeywordSummary};
use crate::sources::{BibliographicSource, SearchQuery};

/// Candidates for one paragraph. `error` is set when retrieval failed
/// outright; `candidates` is then empty.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub candidates: Vec<CandidatePaper>,
    pub error: Option<ServiceError>,
    pub from_cache: bool,
}

pub struct CandidateRetriever {
    source: Arc<dyn BibliographicSource>,
    cache: Arc<RetrievalCache>,
    limiter: ServiceLimiter,
    backoff: BackoffPolicy,
    max_results: usize,
    page_size: usize,
}

impl CandidateRetriever {
    pub fn new(
        source: Arc<dyn BibliographicSource>,
        cache: Arc<RetrievalCache>,
        limiter: ServiceLimiter,
        cfg: &PipelineConfig,
    ) -> Self {
        Self {
            source,
            cache,
            limiter,
            backoff: cfg.backoff.clone(),
            max_results: cfg.max_results,
            page_size: cfg.page_size.max(1),
        }
    }

    #[instrument(skip(self, keywords, cancel), fields(source = self.source.name()))]
    pub async fn retrieve(&self, keywords: &KeywordSummary, cancel: &CancellationToken) -> RetrievalOutcome {
        let query = SearchQuery::from_keywords(keywords);
        if query.is_empty() {
            return RetrievalOutcome::default();
        }
        let key = canonical_query_key(keywords);

        match self.cache.get_or_fetch(&key, || self.fetch_all(&query, cancel)).await {
            Ok((candidates, from_cache)) => {
                debug!(n = candidates.len(), from_cache, "Candidates retrieved");
                RetrievalOutcome { candidates, error: None, from_cache }
            }
            Err(e) => {
                if e != ServiceError::Cancelled {
                    warn!(error = %e, "Candidate retrieval failed");
                }
                RetrievalOutcome { candidates: Vec::new(), error: Some(e), from_cache: false }
            }
        }
    }

    /// Page through the source until `max_results` are collected or the
    /// service returns fewer records than requested. A failure after the
    /// first page keeps what was fetched.
    async fn fetch_all(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidatePaper>, ServiceError> {
        let mut collected: Vec<CandidatePaper> = Vec::new();
        let mut page = 0;

        while collected.len() < self.max_results {
            let result = self.backoff
                .retry("search", cancel, |_| async move {
                    self.limiter.acquire().await?;
                    self.source.search_page(query, page, self.page_size).await
                })
                .await;

            let batch = match result {
                Ok(batch) => batch,
                Err(e) if page > 0 && e != ServiceError::Cancelled => {
                    warn!(page, error = %e, "Pagination stopped early");
                    break;
                }
                Err(e) => return Err(e),
            };

            let last_page = batch.is_last(self.page_size);
            collected.extend(batch.papers);
            if last_page {
                break;
            }
            page += 1;
        }

        Ok(order_candidates(collected, self.max_results))
    }
}

/// Newest first (undated last), then higher source relevance; first
/// occurrence of each canonical id wins; at most `max` kept.
pub fn order_candidates(mut papers: Vec<CandidatePaper>, max: usize) -> Vec<CandidatePaper> {
    papers.sort_by(|a, b| {
        compare_dates_desc(a, b).then_with(|| b.source_relevance.total_cmp(&a.source_relevance))
    });
    let mut seen = HashSet::new();
    papers.retain(|p| seen.insert(p.canonical_id.clone()));
    papers.truncate(max);
    papers
}

/// Descending by publication date with undated papers last.
pub(crate) fn compare_dates_desc(a: &CandidatePaper, b: &CandidatePaper) -> Ordering {
    match (a.publication_date, b.publication_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

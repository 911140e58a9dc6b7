//! Retrieval cache: fixed-size LRU with per-entry TTL and single-flight
//! coalescing of concurrent lookups for the same query.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use paracite_common::ServiceError;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{CandidatePaper, KeywordSummary};

/// Canonical cache key: sorted, deduplicated, lower-cased keywords plus the
/// summary's words with punctuation removed.
pub fn canonical_query_key(ks: &KeywordSummary) -> String {
    let mut keywords: Vec<String> = ks.keywords().iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    keywords.sort();
    keywords.dedup();

    let summary: Vec<String> = ks.summary()
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();

    format!("{}|{}", keywords.join(","), summary.join(" "))
}

struct Entry {
    stored_at: Instant,
    candidates: Vec<CandidatePaper>,
}

pub struct RetrievalCache {
    ttl: Duration,
    entries: Mutex<LruCache<String, Entry>>,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for RetrievalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalCache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl RetrievalCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(cap)),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh entry for `key`, if any. Expired entries are evicted on sight.
    pub fn get(&self, key: &str) -> Option<Vec<CandidatePaper>> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let expired = match entries.get(key) {
            Some(e) if e.stored_at.elapsed() < self.ttl => return Some(e.candidates.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Last writer wins.
    pub fn put(&self, key: String, candidates: Vec<CandidatePaper>) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.put(key, Entry { stored_at: Instant::now(), candidates });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value for `key`, or run `fetch` once for all
    /// concurrent callers of the same key. Errors are returned to the caller
    /// holding the flight and are never cached; waiters then try themselves.
    ///
    /// The boolean is `true` when the value came from the cache.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
    ) -> Result<(Vec<CandidatePaper>, bool), ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<CandidatePaper>, ServiceError>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok((hit, true));
        }

        let ticket = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            FlightTicket {
                cache: self,
                key,
                flight: inflight.entry(key.to_string()).or_default().clone(),
            }
        };

        let _guard = ticket.flight.lock().await;
        if let Some(hit) = self.get(key) {
            debug!(key, "Coalesced retrieval served from cache");
            return Ok((hit, true));
        }
        let candidates = fetch().await?;
        self.put(key.to_string(), candidates.clone());
        Ok((candidates, false))
    }
}

/// One caller's claim on an in-flight key. Dropping it, whether the flight
/// finished or the caller was aborted mid-fetch, removes the key once no one
/// else is waiting on it.
struct FlightTicket<'a> {
    cache: &'a RetrievalCache,
    key: &'a str,
    flight: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        let mut inflight = self.cache.inflight.lock().unwrap_or_else(|p| p.into_inner());
        // The map and this ticket are the only holders
        let last = Arc::strong_count(&self.flight) == 2
            && inflight.get(self.key).is_some_and(|f| Arc::ptr_eq(f, &self.flight));
        if last {
            inflight.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn paper(id: &str) -> CandidatePaper {
        CandidatePaper {
            canonical_id: id.to_string(),
            title: format!("Paper {id}"),
            authors: vec![],
            publication_date: None,
            abstract_text: String::new(),
            external_link: String::new(),
            source_relevance: 0.0,
        }
    }

    fn ks(keywords: &[&str], summary: &str) -> KeywordSummary {
        KeywordSummary::Llm {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            summary: summary.to_string(),
        }
    }

    #[test]
    fn test_canonical_key_ignores_order_case_and_punctuation() {
        let a = ks(&["Transformer", "self-attention"], "Overview of attention-based models.");
        let b = ks(&["self-attention", "transformer", "transformer"], "overview of Attention-based models");
        assert_eq!(canonical_query_key(&a), canonical_query_key(&b));
        assert_eq!(canonical_query_key(&a), "self-attention,transformer|overview of attentionbased models");
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let cache = RetrievalCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), vec![paper("a")]);
        cache.put("b".into(), vec![paper("b")]);
        assert!(cache.get("a").is_some());
        cache.put("c".into(), vec![paper("c")]);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = RetrievalCache::new(4, Duration::from_secs(10));
        cache.put("k".into(), vec![paper("1")]);
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("k").is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_lookups_fetch_once() {
        let cache = Arc::new(RetrievalCache::new(4, Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache.get_or_fetch("q", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(vec![paper("x")])
                }).await
            }));
        }
        for h in handles {
            let (papers, _) = h.await.unwrap().unwrap();
            assert_eq!(papers[0].canonical_id, "x");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finished_flights_leave_no_inflight_keys() {
        let cache = RetrievalCache::new(4, Duration::from_secs(60));
        cache.get_or_fetch("ok", || async { Ok(vec![paper("a")]) }).await.unwrap();
        let _ = cache.get_or_fetch("err", || async { Err(ServiceError::Network("down".into())) }).await;
        assert!(cache.inflight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_fetch_releases_inflight_key() {
        let cache = Arc::new(RetrievalCache::new(4, Duration::from_secs(60)));
        let c = cache.clone();
        let task = tokio::spawn(async move {
            c.get_or_fetch("q", || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            }).await
        });
        while cache.inflight.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(cache.inflight.lock().unwrap().is_empty());

        let (papers, from_cache) = cache.get_or_fetch("q", || async { Ok(vec![paper("z")]) }).await.unwrap();
        assert_eq!(papers[0].canonical_id, "z");
        assert!(!from_cache);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = RetrievalCache::new(4, Duration::from_secs(60));
        let err = cache.get_or_fetch("q", || async {
            Err(ServiceError::Network("down".into()))
        }).await;
        assert!(err.is_err());
        assert!(cache.get("q").is_none());

        let (papers, from_cache) = cache.get_or_fetch("q", || async { Ok(vec![paper("y")]) })
            .await
            .unwrap();
        assert_eq!(papers.len(), 1);
        assert!(!from_cache);
        let (_, from_cache) = cache.get_or_fetch("q", || async { Ok(vec![]) }).await.unwrap();
        assert!(from_cache);
    }
}

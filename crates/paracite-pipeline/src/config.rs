//! Runtime knobs for one pipeline instance.

use std::time::Duration;

use paracite_common::{PipelineError, Result};
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Extra LLM attempts after a schema violation.
    #[serde(default = "default_llm_retry_limit")]
    pub llm_retry_limit: u32,
    /// Seconds a cached retrieval stays fresh.
    #[serde(default = "default_cache_ttl")]
    pub retrieval_cache_ttl: u64,
    #[serde(default = "default_cache_capacity")]
    pub retrieval_cache_capacity: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub similarity_floor: f32,
    #[serde(default = "default_rps")]
    pub llm_rate_limit_rps: f64,
    #[serde(default = "default_rps")]
    pub search_rate_limit_rps: f64,
    /// Seconds a worker waits for a limiter permit before giving up.
    #[serde(default = "default_limiter_max_wait")]
    pub limiter_max_wait: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_fallback_keywords")]
    pub fallback_keyword_count: usize,
    #[serde(default = "default_min_sentence_words")]
    pub min_sentence_words: usize,
    /// Paragraph text beyond this many characters is cut from the LLM prompt.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

fn default_llm_retry_limit()    -> u32   { 2 }
fn default_cache_ttl()          -> u64   { 3600 }
fn default_cache_capacity()     -> usize { 512 }
fn default_top_k()              -> usize { 3 }
fn default_concurrency()        -> usize { 4 }
fn default_rps()                -> f64   { 1.0 }
fn default_limiter_max_wait()   -> u64   { 30 }
fn default_max_results()        -> usize { 20 }
fn default_page_size()          -> usize { 10 }
fn default_fallback_keywords()  -> usize { 5 }
fn default_min_sentence_words() -> usize { 4 }
fn default_max_prompt_chars()   -> usize { 4000 }

/// arXiv asks clients to stay under one request every three seconds.
pub const ARXIV_RATE_LIMIT_RPS: f64 = 0.33;

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm_retry_limit:          default_llm_retry_limit(),
            retrieval_cache_ttl:      default_cache_ttl(),
            retrieval_cache_capacity: default_cache_capacity(),
            top_k:                    default_top_k(),
            concurrency_limit:        default_concurrency(),
            similarity_floor:         0.0,
            llm_rate_limit_rps:       default_rps(),
            search_rate_limit_rps:    default_rps(),
            limiter_max_wait:         default_limiter_max_wait(),
            max_results:              default_max_results(),
            page_size:                default_page_size(),
            fallback_keyword_count:   default_fallback_keywords(),
            min_sentence_words:       default_min_sentence_words(),
            max_prompt_chars:         default_max_prompt_chars(),
            backoff:                  BackoffPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.retrieval_cache_ttl)
    }

    pub fn limiter_wait(&self) -> Duration {
        Duration::from_secs(self.limiter_max_wait)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(PipelineError::Config(msg.to_string()));
        if self.top_k == 0 {
            return bad("top_k must be at least 1");
        }
        if self.concurrency_limit == 0 {
            return bad("concurrency_limit must be at least 1");
        }
        if self.retrieval_cache_capacity == 0 {
            return bad("retrieval_cache_capacity must be at least 1");
        }
        if self.page_size == 0 || self.max_results == 0 {
            return bad("page_size and max_results must be at least 1");
        }
        if self.fallback_keyword_count == 0 {
            return bad("fallback_keyword_count must be at least 1");
        }
        if !(self.llm_rate_limit_rps > 0.0) || !(self.search_rate_limit_rps > 0.0) {
            return bad("rate limits must be positive");
        }
        if !(0.0..=1.0).contains(&self.similarity_floor) {
            return bad("similarity_floor must be within [0, 1]");
        }
        self.backoff.validate()
    }
}

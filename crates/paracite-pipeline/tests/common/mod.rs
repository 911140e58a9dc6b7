//! Mock services shared by the pipeline integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use paracite_common::ServiceError;
use paracite_embed::Embedder;
use paracite_llm::{LlmBackend, LlmError, LlmRequest, LlmResponse};
use paracite_pipeline::models::CandidatePaper;
use paracite_pipeline::sources::{SearchPage, SearchQuery};
use paracite_pipeline::{BackoffPolicy, BibliographicSource, CitationPipeline, PipelineConfig, PipelineServices};
use rand::Rng;

/// Fast limiters and no backoff sleeps.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        llm_rate_limit_rps: 10_000.0,
        search_rate_limit_rps: 10_000.0,
        backoff: BackoffPolicy::immediate(3),
        ..Default::default()
    }
}

pub fn build_pipeline(
    cfg: PipelineConfig,
    llm: Arc<MockLlm>,
    source: Arc<MockSource>,
    embedder: Arc<MockEmbedder>,
) -> CitationPipeline {
    CitationPipeline::new(cfg, PipelineServices { llm, source, embedder }).unwrap()
}

pub fn paper(id: &str, title: &str, year: Option<i32>) -> CandidatePaper {
    CandidatePaper {
        canonical_id: id.to_string(),
        title: title.to_string(),
        authors: vec!["A. Author".into()],
        publication_date: year.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)),
        abstract_text: format!("Abstract of {title}."),
        external_link: format!("https://example.org/{id}"),
        source_relevance: 1.0,
    }
}

async fn jitter(max_latency_ms: u64) {
    if max_latency_ms > 0 {
        let ms = rand::thread_rng().gen_range(0..=max_latency_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// In-flight counter that records its high-water mark.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    pub max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── LLM ───────────────────────────────────────────────────────────────────────

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

/// Answers with `responder(paragraph)`, where `paragraph` is the text after
/// the prompt's `Paragraph:` marker.
pub struct MockLlm {
    responder: Responder,
    pub calls: AtomicUsize,
    pub in_flight: Gauge,
    pub max_latency_ms: u64,
}

impl MockLlm {
    pub fn new(responder: impl Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            in_flight: Gauge::default(),
            max_latency_ms: 0,
        }
    }

    /// Same keywords and summary for every paragraph.
    pub fn fixed(keywords: &[&str], summary: &str) -> Self {
        let body = serde_json::json!({ "keywords": keywords, "summary": summary }).to_string();
        Self::new(move |_| Ok(body.clone()))
    }

    pub fn with_latency(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.enter();
        jitter(self.max_latency_ms).await;
        self.in_flight.exit();

        let prompt = req.messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let paragraph = prompt.split("Paragraph:\n").nth(1).unwrap_or(prompt);
        let content = (self.responder)(paragraph)?;
        Ok(LlmResponse { content, model: "mock".into(), prompt_tokens: 0, completion_tokens: 0 })
    }

    fn model_id(&self) -> &str { "mock-llm" }
    fn is_local(&self) -> bool { true }
}

// ── Search ────────────────────────────────────────────────────────────────────

/// Serves `papers` in pages. Queries containing `fail_keyword` always fail
/// with `RateLimited`.
pub struct MockSource {
    pub papers: Vec<CandidatePaper>,
    pub fail_keyword: Option<String>,
    pub calls: AtomicUsize,
    pub failed_calls: AtomicUsize,
    pub max_latency_ms: u64,
}

impl MockSource {
    pub fn new(papers: Vec<CandidatePaper>) -> Self {
        Self {
            papers,
            fail_keyword: None,
            calls: AtomicUsize::new(0),
            failed_calls: AtomicUsize::new(0),
            max_latency_ms: 0,
        }
    }

    pub fn failing_on(mut self, keyword: &str) -> Self {
        self.fail_keyword = Some(keyword.to_string());
        self
    }

    pub fn with_latency(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BibliographicSource for MockSource {
    async fn search_page(
        &self,
        query: &SearchQuery,
        page: usize,
        page_size: usize,
    ) -> Result<SearchPage, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        jitter(self.max_latency_ms).await;
        if let Some(ref bad) = self.fail_keyword {
            if query.keywords.iter().any(|k| k == bad) {
                self.failed_calls.fetch_add(1, Ordering::SeqCst);
                return Err(ServiceError::RateLimited("429 Too Many Requests".into()));
            }
        }
        Ok(SearchPage::complete(self.papers.iter().skip(page * page_size).take(page_size).cloned().collect()))
    }

    fn name(&self) -> &'static str { "mock" }
}

// ── Embeddings ────────────────────────────────────────────────────────────────

type Vectorizer = Box<dyn Fn(&str) -> Vec<f32> + Send + Sync>;

pub struct MockEmbedder {
    vectorizer: Vectorizer,
    pub calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(vectorizer: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        Self { vectorizer: Box::new(vectorizer), calls: AtomicUsize::new(0) }
    }

    /// Deterministic, non-negative 3-d vectors derived from the text bytes.
    pub fn hashed() -> Self {
        Self::new(|text| {
            let sum: u32 = text.bytes().map(u32::from).sum();
            vec![
                (text.len() % 7 + 1) as f32,
                (sum % 11 + 1) as f32,
                (sum % 5 + 1) as f32,
            ]
        })
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> paracite_embed::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| (self.vectorizer)(t)).collect())
    }

    fn model_id(&self) -> &str { "mock-embedder" }
    fn dimension(&self) -> Option<usize> { None }
}

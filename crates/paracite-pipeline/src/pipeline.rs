//! End-to-end citation pipeline for one document.
//!
//! Orchestrates the full flow:
//!   1. Segment extracted text into paragraphs (fatal on failure)
//!   2. Normalise each paragraph; empty ones are skipped
//!   3. Per paragraph, in a bounded worker pool:
//!      keywords → candidate retrieval → similarity ranking → top-K selection
//!   4. Assemble the DocumentResult in paragraph order
//!   5. Emit progress events via broadcast channel
//!
//! Paragraph-level failures degrade that paragraph only. Cancellation stops
//! dispatch, interrupts in-flight calls and either fails the run or returns
//! the finished paragraphs, depending on [`RunOptions::partial_on_cancel`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use paracite_common::{PipelineError, Result, ServiceError};
use paracite_embed::Embedder;
use paracite_llm::LlmBackend;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::RetrievalCache;
use crate::config::PipelineConfig;
use crate::keywords::KeywordExtractor;
use crate::limiter::ServiceLimiter;
use crate::models::{
    CitationMapping, Degradation, Document, DocumentFormat, DocumentResult, Paragraph,
    ParagraphState, PipelineProgress, PipelineStage,
};
use crate::normalise::normalize;
use crate::ranker::SimilarityRanker;
use crate::retriever::CandidateRetriever;
use crate::segmenter::segment;
use crate::selector::{build_mapping, select_citations};
use crate::sources::BibliographicSource;

// ── Wiring ────────────────────────────────────────────────────────────────────

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct PipelineServices {
    pub llm: Arc<dyn LlmBackend>,
    pub source: Arc<dyn BibliographicSource>,
    pub embedder: Arc<dyn Embedder>,
}

/// Process-lifetime state shared by every run: the retrieval cache and one
/// limiter per rate-limited service.
#[derive(Clone, Debug)]
pub struct SharedResources {
    pub cache: Arc<RetrievalCache>,
    pub llm_limiter: ServiceLimiter,
    pub search_limiter: ServiceLimiter,
}

impl SharedResources {
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            cache: Arc::new(RetrievalCache::new(cfg.retrieval_cache_capacity, cfg.cache_ttl())),
            llm_limiter: ServiceLimiter::new("llm", cfg.llm_rate_limit_rps, cfg.limiter_wait())?,
            search_limiter: ServiceLimiter::new("search", cfg.search_rate_limit_rps, cfg.limiter_wait())?,
        })
    }
}

/// Per-run knobs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cancel: CancellationToken,
    /// On cancellation, return finished paragraphs instead of failing.
    pub partial_on_cancel: bool,
    pub progress: Option<broadcast::Sender<PipelineProgress>>,
}

struct Stages {
    config: PipelineConfig,
    keywords: KeywordExtractor,
    retriever: CandidateRetriever,
    ranker: SimilarityRanker,
}

/// Cheap to clone; clones share stages, cache and limiters.
#[derive(Clone)]
pub struct CitationPipeline {
    stages: Arc<Stages>,
}

impl CitationPipeline {
    /// Pipeline with its own cache and limiters.
    pub fn new(config: PipelineConfig, services: PipelineServices) -> Result<Self> {
        let shared = SharedResources::from_config(&config)?;
        Self::with_shared(config, services, shared)
    }

    pub fn with_shared(
        config: PipelineConfig,
        services: PipelineServices,
        shared: SharedResources,
    ) -> Result<Self> {
        config.validate()?;
        let keywords = KeywordExtractor::new(services.llm, shared.llm_limiter, &config);
        let retriever = CandidateRetriever::new(services.source, shared.cache, shared.search_limiter, &config);
        let ranker = SimilarityRanker::new(services.embedder, config.backoff.clone());
        Ok(Self { stages: Arc::new(Stages { config, keywords, retriever, ranker }) })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.stages.config
    }

    /// Segment `raw_text` and run every paragraph through the pipeline.
    pub async fn run(&self, raw_text: &str, format: DocumentFormat, opts: RunOptions) -> Result<DocumentResult> {
        let paragraphs = segment(raw_text, format)?;
        let document = Document { id: Uuid::new_v4(), format, paragraphs };
        self.run_document(document, opts).await
    }

    /// Run an already segmented document.
    #[instrument(skip(self, document, opts), fields(document_id = %document.id, paragraphs = document.paragraphs.len()))]
    pub async fn run_document(&self, document: Document, opts: RunOptions) -> Result<DocumentResult> {
        let t0 = Instant::now();
        let Document { id: document_id, format, paragraphs } = document;
        let paragraph_count = paragraphs.len();
        if paragraph_count == 0 {
            return Err(PipelineError::Extraction("document has no paragraphs".into()));
        }
        info!(paragraphs = paragraph_count, format = format.as_str(), "Starting citation pipeline");

        let reporter = ProgressReporter {
            tx: opts.progress.clone(),
            document_id,
            total: paragraph_count,
            done: Arc::new(AtomicUsize::new(0)),
        };
        reporter.emit(PipelineStage::Segmented, None, false);

        // ── Normalise; skipped paragraphs are final immediately ─────────────
        let mut mappings: Vec<CitationMapping> = Vec::with_capacity(paragraph_count);
        let mut queue: Vec<Paragraph> = Vec::new();
        for mut paragraph in paragraphs {
            if paragraph.state == ParagraphState::Pending {
                paragraph.advance(ParagraphState::Segmented);
            }
            let normalized = normalize(&paragraph.raw_text, self.stages.config.min_sentence_words);
            if normalized.is_empty() {
                paragraph.advance(ParagraphState::Skipped);
                debug!(paragraph = paragraph.index, "Paragraph skipped");
                mappings.push(CitationMapping::skipped(&paragraph));
                reporter.finish_one(paragraph.index, false);
                continue;
            }
            paragraph.display_text = normalized.display_text;
            paragraph.normalized_text = normalized.normalized_text;
            paragraph.tokens = normalized.tokens;
            paragraph.advance(ParagraphState::Normalized);
            queue.push(paragraph);
        }

        // ── Bounded worker pool ──────────────────────────────────────────────
        let semaphore = Arc::new(Semaphore::new(self.stages.config.concurrency_limit));
        let mut workers = JoinSet::new();

        for paragraph in queue {
            let permit = tokio::select! {
                biased;
                _ = opts.cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let stages = self.stages.clone();
            let cancel = opts.cancel.clone();
            let reporter = reporter.clone();
            workers.spawn(async move {
                let _permit = permit;
                let index = paragraph.index;
                let outcome = process_paragraph(&stages, paragraph, &cancel, &reporter).await;
                if let Ok(ref mapping) = outcome {
                    reporter.finish_one(index, mapping.degraded);
                }
                outcome
            });
        }

        // ── Join barrier ─────────────────────────────────────────────────────
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(mapping)) => mappings.push(mapping),
                Ok(Err(_cancelled)) => {}
                Err(e) => {
                    return Err(PipelineError::Other(anyhow::anyhow!("paragraph worker failed: {e}")));
                }
            }
        }

        let duration_ms = t0.elapsed().as_millis() as u64;
        let incomplete = mappings.len() < paragraph_count;
        if incomplete && opts.cancel.is_cancelled() {
            reporter.emit(PipelineStage::Cancelled, None, false);
            if !opts.partial_on_cancel {
                info!(finished = mappings.len(), "Citation pipeline cancelled");
                return Err(PipelineError::Cancelled);
            }
            info!(finished = mappings.len(), "Citation pipeline cancelled, returning partial result");
            return Ok(DocumentResult::assemble(document_id, format, paragraph_count, mappings, true, duration_ms));
        }

        let result = DocumentResult::assemble(document_id, format, paragraph_count, mappings, false, duration_ms);
        reporter.emit(PipelineStage::Finished, None, result.degraded_count > 0);
        info!(
            paragraphs = result.paragraph_count,
            degraded = result.degraded_count,
            empty = result.empty_count,
            skipped = result.skipped_count,
            duration_ms,
            "Citation pipeline complete"
        );
        Ok(result)
    }
}

// ── Per-paragraph flow ────────────────────────────────────────────────────────

/// Runs one normalised paragraph to `Done`. Only cancellation is an error.
async fn process_paragraph(
    stages: &Stages,
    mut paragraph: Paragraph,
    cancel: &CancellationToken,
    reporter: &ProgressReporter,
) -> std::result::Result<CitationMapping, ServiceError> {
    let index = paragraph.index;
    let mut degradation = Vec::new();

    reporter.emit(PipelineStage::Keywords, Some(index), false);
    let keywords = stages.keywords
        .extract(index, &paragraph.normalized_text, &paragraph.display_text, &paragraph.tokens, cancel)
        .await?;
    paragraph.advance(ParagraphState::KeywordsReady(keywords.provenance()));
    if keywords.is_fallback() {
        degradation.push(Degradation::KeywordFallback);
    }

    reporter.emit(PipelineStage::Retrieval, Some(index), !degradation.is_empty());
    let retrieval = stages.retriever.retrieve(&keywords, cancel).await;
    if retrieval.error == Some(ServiceError::Cancelled) {
        return Err(ServiceError::Cancelled);
    }

    let citations = if retrieval.candidates.is_empty() {
        paragraph.advance(ParagraphState::CandidatesEmpty);
        degradation.push(match retrieval.error {
            Some(_) => Degradation::RetrievalFailed,
            None => Degradation::NoCandidates,
        });
        // Nothing to rank
        paragraph.advance(ParagraphState::Ranked);
        Vec::new()
    } else {
        paragraph.advance(ParagraphState::CandidatesReady);
        reporter.emit(PipelineStage::Ranking, Some(index), !degradation.is_empty());

        let query_text = if keywords.summary().trim().is_empty() {
            paragraph.normalized_text.as_str()
        } else {
            keywords.summary()
        };
        let ranked = match stages.ranker.rank(query_text, retrieval.candidates, cancel).await {
            Ok(ranked) => ranked,
            Err(ServiceError::Cancelled) => return Err(ServiceError::Cancelled),
            Err(e) => {
                warn!(paragraph = index, error = %e, "Ranking failed");
                degradation.push(Degradation::EmbeddingFailed);
                Vec::new()
            }
        };
        paragraph.advance(ParagraphState::Ranked);
        select_citations(ranked, stages.config.top_k, stages.config.similarity_floor)
    };

    paragraph.advance(ParagraphState::Done);
    debug!(paragraph = index, citations = citations.len(), degraded = !degradation.is_empty(), "Paragraph done");
    Ok(build_mapping(index, &paragraph.display_text, Some(keywords), citations, degradation))
}

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct ProgressReporter {
    tx: Option<broadcast::Sender<PipelineProgress>>,
    document_id: Uuid,
    total: usize,
    done: Arc<AtomicUsize>,
}

impl ProgressReporter {
    fn emit(&self, stage: PipelineStage, paragraph_index: Option<usize>, degraded: bool) {
        if let Some(ref tx) = self.tx {
            // No receivers is fine
            let _ = tx.send(PipelineProgress {
                document_id: self.document_id,
                stage,
                paragraph_index,
                paragraphs_total: self.total,
                paragraphs_done: self.done.load(Ordering::Relaxed),
                degraded,
            });
        }
    }

    fn finish_one(&self, paragraph_index: usize, degraded: bool) {
        self.done.fetch_add(1, Ordering::Relaxed);
        self.emit(PipelineStage::ParagraphDone, Some(paragraph_index), degraded);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use paracite_llm::{LlmError, LlmRequest, LlmResponse};
    use crate::backoff::BackoffPolicy;
    use crate::sources::{SearchPage, SearchQuery};

    struct EchoLlm;

    #[async_trait]
    impl LlmBackend for EchoLlm {
        async fn complete(&self, _req: LlmRequest) -> std::result::Result<LlmResponse, LlmError> {
            Ok(LlmResponse {
                content: r#"{"keywords": ["graph", "network", "molecule"], "summary": "Graph networks."}"#.into(),
                model: "echo".into(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
        fn model_id(&self) -> &str { "echo" }
        fn is_local(&self) -> bool { true }
    }

    struct EmptySource;

    #[async_trait]
    impl BibliographicSource for EmptySource {
        async fn search_page(&self, _q: &SearchQuery, _p: usize, _s: usize) -> std::result::Result<SearchPage, ServiceError> {
            Ok(SearchPage::default())
        }
        fn name(&self) -> &'static str { "empty" }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> paracite_embed::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn model_id(&self) -> &str { "unit" }
        fn dimension(&self) -> Option<usize> { Some(2) }
    }

    fn pipeline() -> CitationPipeline {
        let cfg = PipelineConfig {
            llm_rate_limit_rps: 1000.0,
            search_rate_limit_rps: 1000.0,
            backoff: BackoffPolicy::immediate(3),
            ..Default::default()
        };
        CitationPipeline::new(cfg, PipelineServices {
            llm: Arc::new(EchoLlm),
            source: Arc::new(EmptySource),
            embedder: Arc::new(UnitEmbedder),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_input_is_fatal() {
        let err = pipeline().run("   \n\n ", DocumentFormat::Text, RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_no_candidates_is_degraded_done() {
        let result = pipeline()
            .run("Graph neural networks predict molecular properties well.", DocumentFormat::Text, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.mappings.len(), 1);
        let m = &result.mappings[0];
        assert_eq!(m.state, ParagraphState::Done);
        assert!(m.degraded);
        assert_eq!(m.degradation, vec![Degradation::NoCandidates]);
        assert_eq!(result.empty_count, 1);
    }

    #[tokio::test]
    async fn test_progress_events_end_with_finished() {
        let (tx, mut rx) = broadcast::channel(64);
        let opts = RunOptions { progress: Some(tx), ..Default::default() };
        pipeline()
            .run("Graph neural networks predict molecular properties well.", DocumentFormat::Text, opts)
            .await
            .unwrap();

        let mut stages = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            stages.push(ev.stage);
        }
        assert_eq!(stages.first(), Some(&PipelineStage::Segmented));
        assert_eq!(stages.last(), Some(&PipelineStage::Finished));
        assert!(stages.contains(&PipelineStage::ParagraphDone));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fails_without_partial() {
        let opts = RunOptions::default();
        opts.cancel.cancel();
        let err = pipeline()
            .run("Graph neural networks predict molecular properties well.", DocumentFormat::Text, opts)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = PipelineConfig { top_k: 0, ..Default::default() };
        let services = PipelineServices {
            llm: Arc::new(EchoLlm),
            source: Arc::new(EmptySource),
            embedder: Arc::new(UnitEmbedder),
        };
        assert!(matches!(CitationPipeline::new(cfg, services), Err(PipelineError::Config(_))));
    }
}

//! paracite-pipeline — citation recommendation for document paragraphs.
//! - Paragraph segmentation and normalisation
//! - Keyword/summary extraction via an LLM, with a local fallback
//! - Candidate retrieval (arXiv, CrossRef) with caching and rate limiting
//! - Embedding-based similarity ranking and top-K selection
//! - Bounded-concurrency orchestration with cancellation

pub mod backoff;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod keywords;
pub mod limiter;
pub mod models;
pub mod normalise;
pub mod pipeline;
pub mod ranker;
pub mod retriever;
pub mod segmenter;
pub mod selector;
pub mod sources;

pub use backoff::BackoffPolicy;
pub use cache::RetrievalCache;
pub use config::PipelineConfig;
pub use ingest::{DefaultExtractor, TextExtractor};
pub use limiter::ServiceLimiter;
pub use models::{Citation, CitationMapping, DocumentFormat, DocumentResult, KeywordSummary, PipelineProgress};
pub use pipeline::{CitationPipeline, PipelineServices, RunOptions, SharedResources};
pub use sources::{ArxivSource, BibliographicSource, CrossRefSource, SearchPage};

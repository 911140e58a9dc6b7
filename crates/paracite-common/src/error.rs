use serde::Serialize;
use thiserror::Error;

/// Document-level failures. These abort the whole pipeline run and reach the
/// caller unmodified.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input could not be turned into at least one paragraph. Never degraded.
    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Paragraph-local failures of an external service call.
///
/// These never abort sibling paragraphs: the stage that sees one either
/// retries it through the backoff policy or absorbs it into a degraded result.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ServiceError {
    /// Response arrived but did not match the requested structure.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Explicit rate-limit signal, or the shared limiter could not grant a
    /// permit within its maximum wait.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The embedding service answered with unusable vectors.
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Call cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Whether the shared backoff policy should try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_) | ServiceError::Network(_))
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_))
    }
}

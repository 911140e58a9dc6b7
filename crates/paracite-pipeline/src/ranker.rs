//! Semantic-similarity ranking of candidate papers against one paragraph.
//!
//! The paragraph's summary and every candidate's `title. abstract` are
//! embedded in a single batch with the same model, then ordered by
//! `relevance = clamp(cosine, 0, 1)`.

use std::sync::Arc;

use paracite_common::ServiceError;
use paracite_embed::{cosine_similarity, validate_vectors, Embedder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::backoff::BackoffPolicy;
use crate::models::{CandidatePaper, RankedCandidate};
use crate::retriever::compare_dates_desc;

pub struct SimilarityRanker {
    embedder: Arc<dyn Embedder>,
    backoff: BackoffPolicy,
}

impl SimilarityRanker {
    pub fn new(embedder: Arc<dyn Embedder>, backoff: BackoffPolicy) -> Self {
        Self { embedder, backoff }
    }

    /// Rank `candidates` against `query_text`. Any embedding failure,
    /// including wrong vector counts or dimensions, is an `Embedding` error.
    #[instrument(skip(self, query_text, candidates, cancel), fields(model = self.embedder.model_id(), n = candidates.len()))]
    pub async fn rank(
        &self,
        query_text: &str,
        candidates: Vec<CandidatePaper>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedCandidate>, ServiceError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut texts = Vec::with_capacity(candidates.len() + 1);
        texts.push(query_text.to_string());
        texts.extend(candidates.iter().map(CandidatePaper::embedding_text));

        let vectors = self.backoff
            .retry("embed", cancel, |_| {
                let texts = &texts;
                async move { self.embedder.embed(texts).await.map_err(ServiceError::from) }
            })
            .await?;

        let dim = validate_vectors(&vectors, texts.len()).map_err(ServiceError::from)?;
        if let Some(expected) = self.embedder.dimension() {
            if expected != dim {
                return Err(ServiceError::Embedding(format!(
                    "model {} returned {dim}-d vectors, expected {expected}",
                    self.embedder.model_id()
                )));
            }
        }

        let (query, rest) = vectors.split_at(1);
        let scores: Vec<f32> = rest.iter().map(|v| relevance(&query[0], v)).collect();
        let ranked = rank_by_similarity(candidates.into_iter().zip(scores).collect());
        debug!(top = ranked.first().map(|r| r.similarity_score), "Candidates ranked");
        Ok(ranked)
    }
}

/// `max(0, cosine)`, at most 1. Non-finite similarities (NaN or infinite
/// components in a vector) count as 0.
pub fn relevance(a: &[f32], b: &[f32]) -> f32 {
    let cosine = cosine_similarity(a, b);
    if cosine.is_finite() { cosine.clamp(0.0, 1.0) } else { 0.0 }
}

/// Total order: relevance descending, then newest first (undated last), then
/// canonical id ascending. Ranks are assigned 1-based.
pub fn rank_by_similarity(scored: Vec<(CandidatePaper, f32)>) -> Vec<RankedCandidate> {
    let mut scored = scored;
    scored.sort_by(|(pa, sa), (pb, sb)| {
        sb.total_cmp(sa)
            .then_with(|| compare_dates_desc(pa, pb))
            .then_with(|| pa.canonical_id.cmp(&pb.canonical_id))
    });
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (paper, similarity_score))| RankedCandidate { paper, similarity_score, rank: i + 1 })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

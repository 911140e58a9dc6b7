//! Top-K selection and per-paragraph mapping assembly.

use crate::models::{Citation, CitationMapping, Degradation, KeywordSummary, ParagraphState, RankedCandidate};

/// Keep candidates at or above `floor`, then the first `top_k` of them.
/// Input must already be ranked.
pub fn select_citations(ranked: Vec<RankedCandidate>, top_k: usize, floor: f32) -> Vec<Citation> {
    ranked
        .into_iter()
        .filter(|r| r.similarity_score >= floor)
        .take(top_k)
        .map(|candidate| Citation {
            relevance_percentage: relevance_percentage(candidate.similarity_score),
            candidate,
        })
        .collect()
}

/// `round(relevance × 100)`, clamped to 0..=100.
pub fn relevance_percentage(relevance: f32) -> u8 {
    (relevance.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Final mapping for a paragraph that went through the whole pipeline.
/// `degraded` is derived from the reasons collected along the way.
pub fn build_mapping(
    paragraph_index: usize,
    display_text: &str,
    keywords: Option<KeywordSummary>,
    citations: Vec<Citation>,
    degradation: Vec<Degradation>,
) -> CitationMapping {
    CitationMapping {
        paragraph_index,
        paragraph_text: display_text.to_string(),
        state: ParagraphState::Done,
        keywords,
        citations,
        degraded: !degradation.is_empty(),
        degradation,
    }
}

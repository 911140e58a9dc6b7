//! Data models for the citation pipeline.

use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

// ── Document ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf  => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Text => "text",
        }
    }

    /// Guess from a file extension; anything unknown is treated as plain text.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf"  => DocumentFormat::Pdf,
            "docx" => DocumentFormat::Docx,
            _      => DocumentFormat::Text,
        }
    }
}

/// A segmented document. Paragraph order is fixed once segmentation finishes.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub format: DocumentFormat,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone)]
pub struct Paragraph {
    pub index: usize,
    pub raw_text: String,
    /// Byte range into the extracted raw text.
    pub span: Range<usize>,
    pub normalized_text: String,
    pub display_text: String,
    pub tokens: Vec<String>,
    pub state: ParagraphState,
}

impl Paragraph {
    pub fn stub(index: usize, raw_text: String, span: Range<usize>) -> Self {
        Self {
            index,
            raw_text,
            span,
            normalized_text: String::new(),
            display_text: String::new(),
            tokens: Vec::new(),
            state: ParagraphState::Pending,
        }
    }

    /// Move to `next`, refusing transitions the state machine does not allow.
    pub fn advance(&mut self, next: ParagraphState) {
        if !self.state.can_advance_to(&next) {
            debug_assert!(
                false,
                "illegal paragraph transition {:?} -> {:?}",
                self.state, next
            );
            error!(
                paragraph = self.index,
                from = ?self.state,
                to = ?next,
                "Illegal paragraph state transition"
            );
            return;
        }
        self.state = next;
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Llm,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "provenance", rename_all = "snake_case")]
pub enum ParagraphState {
    Pending,
    Segmented,
    Normalized,
    Skipped,
    KeywordsReady(Provenance),
    CandidatesReady,
    CandidatesEmpty,
    Ranked,
    Done,
}

impl ParagraphState {
    pub fn can_advance_to(&self, next: &ParagraphState) -> bool {
        use ParagraphState::*;
        matches!(
            (self, next),
            (Pending, Segmented)
                | (Segmented, Normalized)
                | (Segmented, Skipped)
                | (Normalized, KeywordsReady(_))
                | (KeywordsReady(_), CandidatesReady)
                | (KeywordsReady(_), CandidatesEmpty)
                | (CandidatesReady, Ranked)
                | (CandidatesEmpty, Ranked)
                | (Ranked, Done)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ParagraphState::Done | ParagraphState::Skipped)
    }
}

// ── Keywords ──────────────────────────────────────────────────────────────────

/// Keywords and a short summary for one paragraph, tagged by who produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provenance", rename_all = "snake_case")]
pub enum KeywordSummary {
    Llm { keywords: Vec<String>, summary: String },
    Fallback { keywords: Vec<String>, summary: String },
}

impl KeywordSummary {
    pub fn keywords(&self) -> &[String] {
        match self {
            KeywordSummary::Llm { keywords, .. } | KeywordSummary::Fallback { keywords, .. } => keywords,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            KeywordSummary::Llm { summary, .. } | KeywordSummary::Fallback { summary, .. } => summary,
        }
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            KeywordSummary::Llm { .. } => Provenance::Llm,
            KeywordSummary::Fallback { .. } => Provenance::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, KeywordSummary::Fallback { .. })
    }
}

// ── Candidates ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePaper {
    pub canonical_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub publication_date: Option<NaiveDate>,
    pub abstract_text: String,
    pub external_link: String,
    /// Service-specific relevance; only comparable within one source.
    pub source_relevance: f32,
}

impl CandidatePaper {
    /// Text embedded for similarity ranking.
    pub fn embedding_text(&self) -> String {
        format!("{}. {}", self.title.trim(), self.abstract_text.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub paper: CandidatePaper,
    /// Calibrated similarity in [0, 1].
    pub similarity_score: f32,
    /// 1-based.
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(flatten)]
    pub candidate: RankedCandidate,
    pub relevance_percentage: u8,
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    KeywordFallback,
    RetrievalFailed,
    NoCandidates,
    EmbeddingFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationMapping {
    pub paragraph_index: usize,
    pub paragraph_text: String,
    pub state: ParagraphState,
    pub keywords: Option<KeywordSummary>,
    pub citations: Vec<Citation>,
    pub degraded: bool,
    pub degradation: Vec<Degradation>,
}

impl CitationMapping {
    /// Entry for a paragraph that normalised to nothing. Not degraded.
    pub fn skipped(paragraph: &Paragraph) -> Self {
        Self {
            paragraph_index: paragraph.index,
            paragraph_text: paragraph.raw_text.trim().to_string(),
            state: ParagraphState::Skipped,
            keywords: None,
            citations: Vec::new(),
            degraded: false,
            degradation: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document_id: Uuid,
    pub format: DocumentFormat,
    pub mappings: Vec<CitationMapping>,
    pub paragraph_count: usize,
    pub degraded_count: usize,
    pub empty_count: usize,
    pub skipped_count: usize,
    /// Set when the run was cancelled and only finished paragraphs are present.
    pub partial: bool,
    pub duration_ms: u64,
}

impl DocumentResult {
    /// Assemble from mappings in any order; output is ordered by paragraph index.
    pub fn assemble(
        document_id: Uuid,
        format: DocumentFormat,
        paragraph_count: usize,
        mut mappings: Vec<CitationMapping>,
        partial: bool,
        duration_ms: u64,
    ) -> Self {
        mappings.sort_by_key(|m| m.paragraph_index);
        let degraded_count = mappings.iter().filter(|m| m.degraded).count();
        let skipped_count = mappings.iter()
            .filter(|m| m.state == ParagraphState::Skipped)
            .count();
        let empty_count = mappings.iter()
            .filter(|m| m.citations.is_empty() && m.state != ParagraphState::Skipped)
            .count();
        Self {
            document_id,
            format,
            mappings,
            paragraph_count,
            degraded_count,
            empty_count,
            skipped_count,
            partial,
            duration_ms,
        }
    }
}

// ── Progress events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Segmented,
    Keywords,
    Retrieval,
    Ranking,
    ParagraphDone,
    Finished,
    Cancelled,
}

/// Progress event emitted during a run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct PipelineProgress {
    pub document_id: Uuid,
    pub stage: PipelineStage,
    pub paragraph_index: Option<usize>,
    pub paragraphs_total: usize,
    pub paragraphs_done: usize,
    pub degraded: bool,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions_are_legal() {
        let mut p = Paragraph::stub(0, "text".into(), 0..4);
        for next in [
            ParagraphState::Segmented,
            ParagraphState::Normalized,
            ParagraphState::KeywordsReady(Provenance::Llm),
            ParagraphState::CandidatesReady,
            ParagraphState::Ranked,
            ParagraphState::Done,
        ] {
            p.advance(next);
            assert_eq!(p.state, next);
        }
        assert!(p.state.is_terminal());
    }

    #[test]
    fn test_empty_candidates_still_pass_through_ranked() {
        let s = ParagraphState::CandidatesEmpty;
        assert!(s.can_advance_to(&ParagraphState::Ranked));
        assert!(!s.can_advance_to(&ParagraphState::Done));
    }

    #[test]
    fn test_terminal_states_do_not_advance() {
        for terminal in [ParagraphState::Done, ParagraphState::Skipped] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_advance_to(&ParagraphState::Normalized));
            assert!(!terminal.can_advance_to(&ParagraphState::Done));
        }
    }

    #[test]
    fn test_skipping_stages_is_illegal() {
        assert!(!ParagraphState::Pending.can_advance_to(&ParagraphState::Normalized));
        assert!(!ParagraphState::Normalized.can_advance_to(&ParagraphState::CandidatesReady));
    }

    #[test]
    fn test_keyword_summary_accessors() {
        let ks = KeywordSummary::Fallback {
            keywords: vec!["attention".into()],
            summary: "Attention helps.".into(),
        };
        assert!(ks.is_fallback());
        assert_eq!(ks.provenance(), Provenance::Fallback);
        assert_eq!(ks.keywords(), ["attention".to_string()]);

        let json = serde_json::to_value(&ks).unwrap();
        assert_eq!(json["provenance"], "fallback");
    }

    #[test]
    fn test_assemble_orders_and_counts() {
        let mk = |i: usize, degraded: bool, state: ParagraphState| CitationMapping {
            paragraph_index: i,
            paragraph_text: format!("p{i}"),
            state,
            keywords: None,
            citations: vec![],
            degraded,
            degradation: vec![],
        };
        let result = DocumentResult::assemble(
            Uuid::new_v4(),
            DocumentFormat::Text,
            3,
            vec![
                mk(2, true, ParagraphState::Done),
                mk(0, false, ParagraphState::Skipped),
                mk(1, false, ParagraphState::Done),
            ],
            false,
            5,
        );
        let order: Vec<usize> = result.mappings.iter().map(|m| m.paragraph_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(result.degraded_count, 1);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.empty_count, 2);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_extension("PDF"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_extension("docx"), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::from_extension("md"), DocumentFormat::Text);
    }
}

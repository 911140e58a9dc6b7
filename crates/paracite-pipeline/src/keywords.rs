//! Keyword and summary extraction.
//!
//! One LLM call per paragraph, validated into [`KeywordSummary::Llm`]. When
//! the model keeps answering off-schema, or the service stays unreachable
//! through backoff, a local frequency heuristic produces
//! [`KeywordSummary::Fallback`] instead, so every non-empty paragraph ends up
//! with at least one keyword.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use paracite_common::ServiceError;
use paracite_llm::{LlmBackend, LlmRequest, Message};
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::config::PipelineConfig;
use crate::limiter::ServiceLimiter;
use crate::models::KeywordSummary;
use crate::normalise::{is_stop_word, split_sentences};

pub const MIN_KEYWORDS: usize = 3;
pub const MAX_KEYWORDS: usize = 8;
pub const MAX_SUMMARY_CHARS: usize = 280;

const SYSTEM_PROMPT: &str = "You extract literature-search keywords from paragraphs of academic writing. \
    You always answer with a single JSON object and nothing else.";

pub struct KeywordExtractor {
    llm: Arc<dyn LlmBackend>,
    limiter: ServiceLimiter,
    backoff: BackoffPolicy,
    retry_limit: u32,
    max_prompt_chars: usize,
    fallback_count: usize,
}

impl KeywordExtractor {
    pub fn new(llm: Arc<dyn LlmBackend>, limiter: ServiceLimiter, cfg: &PipelineConfig) -> Self {
        Self {
            llm,
            limiter,
            backoff: cfg.backoff.clone(),
            retry_limit: cfg.llm_retry_limit,
            max_prompt_chars: cfg.max_prompt_chars,
            fallback_count: cfg.fallback_keyword_count,
        }
    }

    /// Keywords for one normalised paragraph. Only cancellation is an error;
    /// every other failure degrades to the local heuristic.
    #[instrument(skip(self, normalized_text, display_text, tokens, cancel), fields(model = self.llm.model_id()))]
    pub async fn extract(
        &self,
        paragraph_index: usize,
        normalized_text: &str,
        display_text: &str,
        tokens: &[String],
        cancel: &CancellationToken,
    ) -> Result<KeywordSummary, ServiceError> {
        let paragraph = truncate_chars(display_text, self.max_prompt_chars);

        for schema_attempt in 0..=self.retry_limit {
            let request = build_request(paragraph, schema_attempt > 0);
            let response = self.backoff
                .retry("llm", cancel, |_| {
                    let request = request.clone();
                    async move {
                        self.limiter.acquire().await?;
                        self.llm.complete(request).await.map_err(ServiceError::from)
                    }
                })
                .await;

            match response {
                Ok(resp) => match parse_keyword_response(&resp.content) {
                    Ok((keywords, summary)) => {
                        debug!(paragraph = paragraph_index, n = keywords.len(), "LLM keywords accepted");
                        return Ok(KeywordSummary::Llm { keywords, summary });
                    }
                    Err(e) => {
                        warn!(paragraph = paragraph_index, schema_attempt, error = %e, "LLM answer off-schema");
                    }
                },
                Err(ServiceError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => {
                    warn!(paragraph = paragraph_index, error = %e, "LLM unavailable, using fallback keywords");
                    break;
                }
            }
        }

        Ok(fallback_keywords(normalized_text, display_text, tokens, self.fallback_count))
    }
}

// ── Prompting ─────────────────────────────────────────────────────────────────

fn build_request(paragraph: &str, strict: bool) -> LlmRequest {
    let instructions = if strict {
        "Your previous answer could not be used. Return ONLY a JSON object with exactly two fields: \
         \"keywords\", an array of 3 to 8 short lower-case search phrases, and \"summary\", one \
         sentence of at most 280 characters. No markdown fences, no commentary."
    } else {
        "Extract 3 to 8 search keywords and a one-sentence summary (at most 280 characters) from the \
         paragraph below. Respond ONLY with JSON of the form \
         {\"keywords\": [\"keyword1\", \"keyword2\", \"keyword3\"], \"summary\": \"short summary here\"}."
    };
    LlmRequest {
        messages: vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!("{instructions}\n\nParagraph:\n{paragraph}")),
        ],
        max_tokens: Some(300),
        temperature: Some(if strict { 0.0 } else { 0.1 }),
        json_mode: true,
        ..Default::default()
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)```(?:json)?").unwrap())
}

#[derive(Deserialize)]
struct RawKeywords {
    keywords: Vec<String>,
    summary: String,
}

/// Validate an LLM answer into (keywords, summary).
pub fn parse_keyword_response(content: &str) -> Result<(Vec<String>, String), ServiceError> {
    let stripped = fence_re().replace_all(content, "");
    let stripped = stripped.trim();
    let body = match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => return Err(ServiceError::Schema("no JSON object in response".into())),
    };
    let raw: RawKeywords = serde_json::from_str(body)
        .map_err(|e| ServiceError::Schema(format!("invalid keyword JSON: {e}")))?;

    let mut keywords: Vec<String> = Vec::new();
    for k in raw.keywords {
        let k = k.trim().to_lowercase();
        if !k.is_empty() && !keywords.contains(&k) {
            keywords.push(k);
        }
    }
    if keywords.len() < MIN_KEYWORDS {
        return Err(ServiceError::Schema(format!(
            "expected at least {MIN_KEYWORDS} keywords, got {}",
            keywords.len()
        )));
    }
    keywords.truncate(MAX_KEYWORDS);

    let summary = raw.summary.trim();
    if summary.is_empty() {
        return Err(ServiceError::Schema("empty summary".into()));
    }
    Ok((keywords, truncate_chars(summary, MAX_SUMMARY_CHARS).to_string()))
}

// ── Fallback ──────────────────────────────────────────────────────────────────

/// Top `n` non-stop-word tokens by frequency, ties broken by first occurrence;
/// summary is the first sentence. Never returns an empty keyword list for a
/// non-empty paragraph.
pub fn fallback_keywords(
    normalized_text: &str,
    display_text: &str,
    tokens: &[String],
    n: usize,
) -> KeywordSummary {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, token) in tokens.iter().enumerate() {
        let t = token.as_str();
        if t.chars().count() < 2 || is_stop_word(t) || t.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        counts.entry(t).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(&str, usize, usize)> = counts.into_iter().map(|(t, (c, p))| (t, c, p)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let mut keywords: Vec<String> = ranked.into_iter().take(n.max(1)).map(|(t, _, _)| t.to_string()).collect();
    if keywords.is_empty() {
        if let Some(first) = tokens.first().cloned()
            .or_else(|| normalized_text.split_whitespace().next().map(str::to_string))
        {
            keywords.push(first);
        }
    }

    let first_sentence = split_sentences(display_text).into_iter().next().unwrap_or(display_text);
    KeywordSummary::Fallback {
        keywords,
        summary: truncate_chars(first_sentence, MAX_SUMMARY_CHARS).to_string(),
    }
}

/// Prefix of at most `max` characters, cut on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalise::normalize;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_strips_fences_and_normalises_keywords() {
        let content = "```json\n{\"keywords\": [\"Transformer\", \" self-attention \", \"transformer\", \"sequence modeling\"], \
                       \"summary\": \"Overview of attention-based sequence models.\"}\n```";
        let (kw, summary) = parse_keyword_response(content).unwrap();
        assert_eq!(kw, vec!["transformer", "self-attention", "sequence modeling"]);
        assert_eq!(summary, "Overview of attention-based sequence models.");
    }

    #[test]
    fn test_parse_tolerates_leading_chatter() {
        let content = "Sure! Here you go: {\"keywords\": [\"a1\", \"b2\", \"c3\"], \"summary\": \"S.\"} Hope it helps.";
        assert!(parse_keyword_response(content).is_ok());
    }

    #[test]
    fn test_parse_rejects_too_few_keywords_or_empty_summary() {
        let few = r#"{"keywords": ["one", "One", "two"], "summary": "x"}"#;
        assert!(matches!(parse_keyword_response(few), Err(ServiceError::Schema(_))));

        let empty = r#"{"keywords": ["a", "b", "c"], "summary": "   "}"#;
        assert!(matches!(parse_keyword_response(empty), Err(ServiceError::Schema(_))));

        assert!(parse_keyword_response("not json at all").is_err());
        assert!(parse_keyword_response(r#"{"keywords": "a, b, c", "summary": "s"}"#).is_err());
    }

    #[test]
    fn test_parse_truncates_keywords_and_summary() {
        let kws: Vec<String> = (0..12).map(|i| format!("\"kw{i}\"")).collect();
        let long = "y".repeat(400);
        let content = format!("{{\"keywords\": [{}], \"summary\": \"{long}\"}}", kws.join(","));
        let (kw, summary) = parse_keyword_response(&content).unwrap();
        assert_eq!(kw.len(), MAX_KEYWORDS);
        assert_eq!(kw[7], "kw7");
        assert_eq!(summary.chars().count(), MAX_SUMMARY_CHARS);
    }

    #[test]
    fn test_fallback_ranks_by_frequency_then_first_occurrence() {
        let n = normalize(
            "Attention models align tokens. Attention layers replace recurrence in sequence models.",
            4,
        );
        let ks = fallback_keywords(&n.normalized_text, &n.display_text, &n.tokens, 3);
        assert!(ks.is_fallback());
        assert_eq!(ks.keywords(), ["attention", "model", "align"]);
        assert_eq!(ks.summary(), "Attention models align tokens.");
    }

    #[test]
    fn test_fallback_never_empty() {
        let n = normalize("It is what it is and so it was.", 4);
        let ks = fallback_keywords(&n.normalized_text, &n.display_text, &n.tokens, 5);
        assert!(!ks.keywords().is_empty());
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_strict_prompt_differs() {
        let a = build_request("text", false);
        let b = build_request("text", true);
        assert_ne!(a.messages[1].content, b.messages[1].content);
        assert!(a.json_mode && b.json_mode);
    }
}

//! Deterministic paragraph cleanup: markup and citation-marker stripping,
//! short-sentence filtering, tokenisation and plural reduction.
//!
//! Pure functions only; nothing here touches the network.

use std::sync::OnceLock;

use regex::Regex;

/// Output of [`normalize`]. An empty `normalized_text` means the paragraph is
/// skipped downstream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Normalized {
    /// Cleaned text, original casing.
    pub display_text: String,
    /// Lower-cased working copy of `display_text`.
    pub normalized_text: String,
    pub tokens: Vec<String>,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.normalized_text.is_empty()
    }
}

/// Words that never make useful search keywords.
pub const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "in", "of", "to", "is", "was",
    "for", "on", "with", "this", "that", "are", "were", "be", "been",
    "by", "from", "we", "our", "their", "which", "also", "it", "its",
    "as", "at", "these", "those", "such", "can", "may", "has", "have",
    "had", "not", "but", "than", "then", "there", "they", "them", "into",
    "over", "under", "between", "both", "each", "other", "more", "most",
    "some", "all", "any", "very", "will", "would", "could", "should",
    "using", "use", "used", "based", "however", "thus", "while", "where",
    "when", "how", "what", "who", "whose", "do", "does", "did", "being",
    "one", "two", "via", "within", "without", "about", "across", "after",
    "before", "only", "so", "if", "no", "us", "he", "she", "his", "her",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

fn caption_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:fig(?:ure)?|tab(?:le)?)\.?\s*\d+[a-z]?\s*[.:]").unwrap())
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^<>]*>").unwrap())
}

fn numeric_citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\s*\d+(?:\s*[-–,]\s*\d+)*\s*\]").unwrap())
}

fn author_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\(\s*\p{Lu}[^()]*?,\s*(?:19|20)\d{2}[a-z]?(?:\s*;\s*\p{Lu}[^()]*?,\s*(?:19|20)\d{2}[a-z]?)*\s*\)",
        )
        .unwrap()
    })
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+(?:-[\p{L}\p{N}]+)*").unwrap())
}

const SUPERSCRIPT_DIGITS: &[char] = &['⁰', '¹', '²', '³', '⁴', '⁵', '⁶', '⁷', '⁸', '⁹'];

/// Abbreviations whose trailing period does not end a sentence.
const ABBREVIATIONS: &[&str] = &["e.g", "i.e", "al", "fig", "figs", "eq", "eqs", "vs", "cf", "etc", "dr"];

/// Normalise one paragraph. `min_sentence_words` drops shorter sentences.
pub fn normalize(raw: &str, min_sentence_words: usize) -> Normalized {
    if caption_re().is_match(raw) {
        return Normalized::default();
    }

    let text = tag_re().replace_all(raw, " ");
    let text = numeric_citation_re().replace_all(&text, "");
    let text = author_year_re().replace_all(&text, "");
    let text: String = text.chars().filter(|c| !SUPERSCRIPT_DIGITS.contains(c)).collect();
    let text = collapse_whitespace(&text);

    let kept: Vec<String> = split_sentences(&text)
        .into_iter()
        .map(tidy_sentence)
        .filter(|s| s.split_whitespace().count() >= min_sentence_words)
        .collect();

    let display_text = kept.join(" ");
    let normalized_text = display_text.to_lowercase();
    let tokens = tokenize(&normalized_text);
    Normalized { display_text, normalized_text, tokens }
}

/// Lower-cased, lemmatised word tokens. Hyphenated compounds stay whole.
pub fn tokenize(text: &str) -> Vec<String> {
    token_re()
        .find_iter(&text.to_lowercase())
        .map(|m| lemmatize(m.as_str()))
        .collect()
}

/// Rule-based English plural reduction.
pub fn lemmatize(word: &str) -> String {
    if word.chars().count() <= 3 || word.chars().any(|c| c.is_ascii_digit()) {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.chars().count() > 1 {
            return format!("{stem}y");
        }
    }
    if let Some(stem) = word.strip_suffix("sses") {
        return format!("{stem}ss");
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => word.to_string(),
    }
}

/// Sentence split on `.`, `?` or `!` followed by whitespace and an upper-case
/// letter, digit or opening quote. Known abbreviations do not split.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for (i, &(pos, c)) in chars.iter().enumerate() {
        if !matches!(c, '.' | '?' | '!') {
            continue;
        }
        let Some(&(_, after)) = chars.get(i + 1) else { continue };
        if !after.is_whitespace() {
            continue;
        }
        let opens_sentence = chars.get(i + 2)
            .is_some_and(|&(_, n)| n.is_uppercase() || n.is_ascii_digit() || n == '"' || n == '“');
        if !opens_sentence {
            continue;
        }
        if c == '.' && ends_with_abbreviation(&text[start..pos]) {
            continue;
        }
        let end = pos + c.len_utf8();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = end;
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fn ends_with_abbreviation(before: &str) -> bool {
    let last = before.rsplit(char::is_whitespace).next().unwrap_or("");
    let last = last.trim_start_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
    ABBREVIATIONS.contains(&last.as_str())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Marker removal leaves gaps such as `word .`; close them up.
fn tidy_sentence(sentence: &str) -> String {
    let mut out = String::with_capacity(sentence.len());
    for c in sentence.chars() {
        if matches!(c, '.' | ',' | ';' | ':' | '?' | '!') && out.ends_with(' ') {
            out.pop();
        }
        out.push(c);
    }
    out.trim().to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strips_tags_markers_and_superscripts() {
        let n = normalize(
            "<p>Transformers rely on <b>self-attention</b> [12] for sequence modeling (Vaswani et al., 2017).</p> \
             Recurrent networks were the norm before³ [3, 4–6].",
            4,
        );
        assert_eq!(
            n.display_text,
            "Transformers rely on self-attention for sequence modeling. Recurrent networks were the norm before."
        );
        assert_eq!(n.normalized_text, n.display_text.to_lowercase());
    }

    #[test]
    fn test_short_sentences_are_dropped() {
        let n = normalize("See above. Attention layers learn alignments between tokens.", 4);
        assert_eq!(n.display_text, "Attention layers learn alignments between tokens.");
    }

    #[test]
    fn test_captions_and_headings_normalize_to_empty() {
        assert!(normalize("Figure 3: Attention weights per head.", 4).is_empty());
        assert!(normalize("Table 2. BLEU scores on WMT 2014.", 4).is_empty());
        assert!(normalize("2.1 Related Work", 4).is_empty());
        assert!(normalize("   \t  ", 4).is_empty());
        assert!(normalize("<br/>", 4).is_empty());
    }

    #[test]
    fn test_abbreviations_do_not_split_sentences() {
        let s = split_sentences("Prior work (e.g. Smith) helps. Results follow here.");
        assert_eq!(s, vec!["Prior work (e.g. Smith) helps.", "Results follow here."]);
        let s = split_sentences("Vaswani et al. Proposed it. Then more.");
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_tokens_are_lemmatized() {
        let toks = tokenize("Transformers use self-attention layers; studies classes analysis 2017s");
        assert_eq!(
            toks,
            vec!["transformer", "use", "self-attention", "layer", "study", "class", "analysis", "2017s"]
        );
    }

    #[test]
    fn test_lemmatize_keeps_short_and_latin_words() {
        assert_eq!(lemmatize("gas"), "gas");
        assert_eq!(lemmatize("corpus"), "corpus");
        assert_eq!(lemmatize("models"), "model");
        assert_eq!(lemmatize("queries"), "query");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let text = "Attention mechanisms (Bahdanau, 2014; Luong, 2015) align source and target tokens.";
        assert_eq!(normalize(text, 4), normalize(text, 4));
        assert!(!normalize(text, 4).display_text.contains("2014"));
    }
}

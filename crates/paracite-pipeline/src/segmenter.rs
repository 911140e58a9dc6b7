//! Paragraph boundary detection over extracted document text.
//!
//! Blocks are separated by blank lines. Inside a block, wrapped lines are
//! joined back together, headings become their own paragraphs, and for PDF
//! text a short sentence-ending line closes the paragraph (the ragged last
//! line of a justified paragraph).

use std::sync::OnceLock;

use paracite_common::{PipelineError, Result};
use regex::Regex;

use crate::models::{DocumentFormat, Paragraph, ParagraphState};

/// A sentence-ending PDF line shorter than this share of the block's longest
/// line ends the paragraph.
const SHORT_LINE_RATIO: f64 = 0.8;
const MAX_HEADING_CHARS: usize = 80;
const MAX_HEADING_WORDS: usize = 10;

const SECTION_NAMES: &[&str] = &[
    "abstract", "introduction", "background", "related work", "prior work",
    "method", "methods", "methodology", "materials and methods", "approach",
    "experiments", "experimental setup", "evaluation", "results",
    "results and discussion", "discussion", "conclusion", "conclusions",
    "future work", "limitations", "acknowledgements", "acknowledgments",
    "references", "bibliography", "appendix",
];

fn numbered_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:\d{1,2}(?:\.\d{1,2})*\.?|[IVXLC]+\.|[A-Z]\.)\s+\p{Lu}").unwrap()
    })
}

fn heading_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\d{1,2}(?:\.\d{1,2})*\.?|[IVXLC]+\.)\s*").unwrap())
}

/// Split `raw` into ordered paragraph stubs in state `Segmented`.
///
/// Fails with `PipelineError::Extraction` when there is no text at all or no
/// paragraph boundary could be found.
pub fn segment(raw: &str, format: DocumentFormat) -> Result<Vec<Paragraph>> {
    if raw.trim().is_empty() {
        return Err(PipelineError::Extraction("document contains no text".into()));
    }

    let mut pieces: Vec<Piece> = Vec::new();
    for block in blocks(raw) {
        split_block(&block, format, &mut pieces);
    }

    if pieces.is_empty() {
        return Err(PipelineError::Extraction("no paragraph boundaries detected".into()));
    }

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let mut p = Paragraph::stub(index, piece.text, piece.start..piece.end);
            p.advance(ParagraphState::Segmented);
            p
        })
        .collect())
}

/// Heading lines: short, no terminal punctuation, and numbered, all caps or
/// a well-known section name.
pub fn is_heading(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty()
        || line.chars().count() > MAX_HEADING_CHARS
        || line.split_whitespace().count() > MAX_HEADING_WORDS
    {
        return false;
    }
    if line.ends_with(['.', '?', '!', ',', ';', ':']) {
        return false;
    }
    if numbered_heading_re().is_match(line) {
        return true;
    }

    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 2 && letters.iter().all(|c| c.is_uppercase()) {
        return true;
    }

    let bare = heading_prefix_re().replace(line, "").trim().to_lowercase();
    SECTION_NAMES.contains(&bare.as_str())
}

// ── Internals ─────────────────────────────────────────────────────────────────

struct Line<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

struct Piece {
    text: String,
    start: usize,
    end: usize,
}

fn blocks(raw: &str) -> Vec<Vec<Line<'_>>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    let mut offset = 0;
    for chunk in raw.split_inclusive('\n') {
        let trimmed = chunk.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            let start = offset + (chunk.len() - chunk.trim_start().len());
            current.push(Line { text: trimmed, start, end: start + trimmed.len() });
        }
        offset += chunk.len();
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_block(lines: &[Line<'_>], format: DocumentFormat, out: &mut Vec<Piece>) {
    let longest = lines.iter().map(|l| l.text.chars().count()).max().unwrap_or(0) as f64;
    let mut current: Option<Piece> = None;
    // A heading can only start where a sentence could: at the top of the
    // block, after a finished sentence, or after another heading.
    let mut at_boundary = true;

    for line in lines {
        if at_boundary && is_heading(line.text) {
            out.extend(current.take());
            out.push(Piece { text: line.text.to_string(), start: line.start, end: line.end });
            continue;
        }
        at_boundary = line.text.ends_with(['.', '?', '!', ':']);

        match current.as_mut() {
            None => current = Some(Piece { text: line.text.to_string(), start: line.start, end: line.end }),
            Some(piece) => {
                join_wrapped(&mut piece.text, line.text);
                piece.end = line.end;
            }
        }

        let closes = format == DocumentFormat::Pdf
            && line.text.ends_with(['.', '?', '!'])
            && (line.text.chars().count() as f64) < SHORT_LINE_RATIO * longest;
        if closes {
            out.extend(current.take());
        }
    }
    out.extend(current);
}

/// Append a wrapped line, removing a hyphen that split a word across lines.
fn join_wrapped(buf: &mut String, next: &str) {
    let mut tail = buf.chars().rev();
    let hyphen_break = tail.next() == Some('-')
        && tail.next().is_some_and(|c| c.is_alphabetic())
        && next.chars().next().is_some_and(|c| c.is_lowercase());
    if hyphen_break {
        buf.pop();
    } else {
        buf.push(' ');
    }
    buf.push_str(next);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

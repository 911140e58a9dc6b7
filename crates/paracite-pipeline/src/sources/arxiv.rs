//! arXiv search client.
//!
//! API: https://export.arxiv.org/api/query (Atom 1.0 feed)
//! Etiquette: no more than one request every three seconds; the pipeline's
//! search limiter enforces this.

use async_trait::async_trait;
use chrono::NaiveDate;
use paracite_common::ServiceError;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, instrument};

use super::{status_error, transport_error, BibliographicSource, SearchPage, SearchQuery};
use crate::models::CandidatePaper;

const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";

pub struct ArxivSource {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivSource {
    pub fn new() -> Self {
        Self::with_base_url(ARXIV_API_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

impl Default for ArxivSource {
    fn default() -> Self { Self::new() }
}

/// `(all:"k1" OR all:"k2") AND (all:t1 OR all:t2 ...)` where `t` are the
/// summary's content words. Either half is dropped when empty.
pub fn build_search_query(query: &SearchQuery) -> String {
    let keywords: Vec<String> = query.keywords.iter()
        .map(|k| format!("all:\"{k}\""))
        .collect();
    let terms: Vec<String> = query.free_text_terms().iter()
        .map(|t| format!("all:{t}"))
        .collect();
    match (keywords.is_empty(), terms.is_empty()) {
        (false, false) => format!("({}) AND ({})", keywords.join(" OR "), terms.join(" OR ")),
        (false, true)  => keywords.join(" OR "),
        (true, false)  => terms.join(" OR "),
        (true, true)   => String::new(),
    }
}

#[async_trait]
impl BibliographicSource for ArxivSource {
    #[instrument(skip(self, query))]
    async fn search_page(
        &self,
        query: &SearchQuery,
        page: usize,
        page_size: usize,
    ) -> Result<SearchPage, ServiceError> {
        let search_query = build_search_query(query);
        if search_query.is_empty() {
            return Ok(SearchPage::default());
        }
        let start = page * page_size;
        let resp = self.client
            .get(&self.base_url)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start",        &start.to_string()),
                ("max_results",  &page_size.to_string()),
                ("sortBy",       "relevance"),
                ("sortOrder",    "descending"),
            ])
            .send()
            .await
            .map_err(|e| transport_error("arxiv", e))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| transport_error("arxiv", e))?;
        if let Some(err) = status_error("arxiv", status, &body) {
            return Err(err);
        }

        let result = parse_atom_feed(&body, start)?;
        debug!(n = result.papers.len(), raw = result.raw_count, page, "arXiv page fetched");
        Ok(result)
    }

    fn name(&self) -> &'static str { "arxiv" }
}

// ── Atom parsing ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    link: Option<String>,
}

/// Parse an arXiv Atom feed. `offset` is the global position of the first
/// entry, used for the positional relevance score.
pub fn parse_atom_feed(xml: &str, offset: usize) -> Result<SearchPage, ServiceError> {
    let mut papers = Vec::new();
    let mut raw_count = 0;
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // State machine for XML parsing
    let mut current: Option<EntryBuilder> = None;
    let mut field: Option<&'static str> = None;
    let mut in_author = false;
    let mut author_name = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                match e.local_name().as_ref() {
                    b"entry" => current = Some(EntryBuilder::default()),
                    b"author" => { in_author = true; author_name.clear(); }
                    b"id" if current.is_some() && !in_author => field = Some("id"),
                    b"title" if current.is_some() => field = Some("title"),
                    b"summary" if current.is_some() => field = Some("summary"),
                    b"published" if current.is_some() => field = Some("published"),
                    b"name" if in_author => field = Some("name"),
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"link" => {
                if let Some(ref mut entry) = current {
                    let mut rel = None;
                    let mut href = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"rel" => rel = attr.unescape_value().ok().map(|v| v.to_string()),
                            b"href" => href = attr.unescape_value().ok().map(|v| v.to_string()),
                            _ => {}
                        }
                    }
                    if rel.as_deref() == Some("alternate") && entry.link.is_none() {
                        entry.link = href;
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default();
                if let (Some(f), Some(entry)) = (field, current.as_mut()) {
                    let target = match f {
                        "id" => &mut entry.id,
                        "title" => &mut entry.title,
                        "summary" => &mut entry.summary,
                        "published" => &mut entry.published,
                        _ => &mut author_name,
                    };
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                match e.local_name().as_ref() {
                    b"id" | b"title" | b"summary" | b"published" | b"name" => field = None,
                    b"author" => {
                        if let Some(ref mut entry) = current {
                            let name = collapse(&author_name);
                            if !name.is_empty() {
                                entry.authors.push(name);
                            }
                        }
                        in_author = false;
                    }
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            if entry.id.contains("/api/errors") {
                                return Err(ServiceError::Schema(format!(
                                    "arxiv rejected query: {}",
                                    collapse(&entry.summary)
                                )));
                            }
                            let position = offset + raw_count;
                            raw_count += 1;
                            if let Some(paper) = entry_to_paper(entry, position) {
                                papers.push(paper);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ServiceError::Schema(format!("arxiv feed parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(SearchPage { papers, raw_count })
}

fn entry_to_paper(entry: EntryBuilder, position: usize) -> Option<CandidatePaper> {
    let id = entry.id.trim();
    let title = collapse(&entry.title);
    if id.is_empty() || title.is_empty() {
        return None;
    }
    let publication_date = entry.published.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

    Some(CandidatePaper {
        canonical_id: canonical_arxiv_id(id),
        title,
        authors: entry.authors,
        publication_date,
        abstract_text: collapse(&entry.summary),
        external_link: entry.link.unwrap_or_else(|| id.to_string()),
        source_relevance: 1.0 / (1.0 + position as f32),
    })
}

/// `http://arxiv.org/abs/1706.03762v7` → `arxiv:1706.03762`
pub fn canonical_arxiv_id(id: &str) -> String {
    let tail = id.split("/abs/").nth(1).unwrap_or(id);
    let bare = match tail.rfind('v') {
        Some(pos) if pos > 0 && tail[pos + 1..].chars().all(|c| c.is_ascii_digit()) && pos + 1 < tail.len() => &tail[..pos],
        _ => tail,
    };
    format!("arxiv:{}", bare.to_lowercase())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! CrossRef works search client.
//!
//! API: https://api.crossref.org/works?query.bibliographic=…
//! Polite pool: send a User-Agent with a mailto (see CrossRef etiquette).

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use paracite_common::ServiceError;
use regex::Regex;
use tracing::{debug, instrument};

use super::{status_error, transport_error, BibliographicSource, SearchPage, SearchQuery};
use crate::models::CandidatePaper;

const CR_SEARCH_URL: &str = "https://api.crossref.org/works";
const CR_SELECT:     &str = "DOI,title,abstract,author,published,URL,score";

pub struct CrossRefSource {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl CrossRefSource {
    /// `mailto` puts requests in CrossRef's polite pool.
    pub fn new(mailto: Option<&str>) -> Self {
        let user_agent = match mailto {
            Some(m) => format!("paracite/{} (mailto:{m})", env!("CARGO_PKG_VERSION")),
            None    => format!("paracite/{}", env!("CARGO_PKG_VERSION")),
        };
        Self { client: reqwest::Client::new(), base_url: CR_SEARCH_URL.to_string(), user_agent }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Keywords followed by the summary, as one free-text bibliographic query.
pub fn bibliographic_query(query: &SearchQuery) -> String {
    let mut parts: Vec<&str> = query.keywords.iter().map(String::as_str).collect();
    if !query.free_text.is_empty() {
        parts.push(&query.free_text);
    }
    parts.join(" ")
}

#[async_trait]
impl BibliographicSource for CrossRefSource {
    #[instrument(skip(self, query))]
    async fn search_page(
        &self,
        query: &SearchQuery,
        page: usize,
        page_size: usize,
    ) -> Result<SearchPage, ServiceError> {
        let text = bibliographic_query(query);
        if text.is_empty() {
            return Ok(SearchPage::default());
        }
        let resp = self.client
            .get(&self.base_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&[
                ("query.bibliographic", text.as_str()),
                ("rows",   &page_size.to_string()),
                ("offset", &(page * page_size).to_string()),
                ("select", CR_SELECT),
            ])
            .send()
            .await
            .map_err(|e| transport_error("crossref", e))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| transport_error("crossref", e))?;
        if let Some(err) = status_error("crossref", status, &body) {
            return Err(err);
        }

        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ServiceError::Schema(format!("crossref: invalid JSON: {e}")))?;
        let items = json["message"]["items"]
            .as_array()
            .ok_or_else(|| ServiceError::Schema("crossref: missing message.items".into()))?;

        let papers: Vec<CandidatePaper> = items.iter().filter_map(work_to_paper).collect();
        debug!(n = papers.len(), raw = items.len(), page, "CrossRef page fetched");
        Ok(SearchPage { papers, raw_count: items.len() })
    }

    fn name(&self) -> &'static str { "crossref" }
}

// ── Conversion ─────────────────────────────────────────────────────────────

fn jats_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?jats:[^>]*>").unwrap())
}

fn work_to_paper(work: &serde_json::Value) -> Option<CandidatePaper> {
    let doi = work["DOI"].as_str()?.trim().to_lowercase();
    let title = work["title"]
        .as_array()
        .and_then(|t| t.first())
        .and_then(|t| t.as_str())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())?;

    // CrossRef returns JATS XML snippets in abstract
    let abstract_text = work["abstract"].as_str()
        .map(|a| {
            let plain = jats_tag_re().replace_all(a, " ");
            plain.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .unwrap_or_default();

    let authors: Vec<String> = work["author"]
        .as_array()
        .map(|list| list.iter()
            .map(|a| {
                let given  = a["given"].as_str().unwrap_or("").trim();
                let family = a["family"].as_str().unwrap_or("").trim();
                if given.is_empty() { family.to_string() } else { format!("{given} {family}") }
            })
            .filter(|n| !n.is_empty())
            .collect())
        .unwrap_or_default();

    let publication_date = work["published"]["date-parts"]
        .as_array()
        .and_then(|dp| dp.first())
        .and_then(|dp| dp.as_array())
        .and_then(|parts| {
            let year  = parts.first()?.as_u64()? as i32;
            let month = parts.get(1).and_then(|m| m.as_u64()).unwrap_or(1) as u32;
            let day   = parts.get(2).and_then(|d| d.as_u64()).unwrap_or(1) as u32;
            NaiveDate::from_ymd_opt(year, month, day)
        });

    let external_link = work["URL"].as_str()
        .map(String::from)
        .unwrap_or_else(|| format!("https://doi.org/{doi}"));

    Some(CandidatePaper {
        canonical_id: format!("doi:{doi}"),
        title,
        authors,
        publication_date,
        abstract_text,
        external_link,
        source_relevance: work["score"].as_f64().unwrap_or(0.0) as f32,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

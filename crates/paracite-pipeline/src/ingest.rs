//! Raw text extraction from uploaded documents.
//!
//! The pipeline only needs plain text; [`DefaultExtractor`] is a thin,
//! layout-unaware implementation good enough for the CLI. Richer extractors
//! can be plugged in through [`TextExtractor`].

use std::io::{Cursor, Read};

use paracite_common::{PipelineError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;
use zip::ZipArchive;

use crate::models::DocumentFormat;

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], format: DocumentFormat) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(&self, bytes: &[u8], format: DocumentFormat) -> Result<String> {
        let text = match format {
            DocumentFormat::Pdf  => extract_pdf(bytes)?,
            DocumentFormat::Docx => extract_docx(bytes)?,
            DocumentFormat::Text => String::from_utf8_lossy(bytes).into_owned(),
        };
        debug!(format = format.as_str(), chars = text.len(), "Text extracted");
        Ok(text)
    }
}

fn extraction_err(what: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Extraction(format!("{what}: {e}"))
}

/// Page text in page order, pages separated by blank lines.
pub fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let pdf = lopdf::Document::load_mem(bytes).map_err(|e| extraction_err("invalid PDF", e))?;
    let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(PipelineError::Extraction("PDF has no pages".into()));
    }

    let mut pages = Vec::with_capacity(page_numbers.len());
    for page in page_numbers {
        match pdf.extract_text(&[page]) {
            Ok(text) => pages.push(text),
            // Image-only or oddly encoded pages contribute nothing
            Err(e) => debug!(page, error = %e, "PDF page has no extractable text"),
        }
    }
    Ok(pages.join("\n\n"))
}

/// Body paragraphs of `word/document.xml`, separated by blank lines.
pub fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| extraction_err("invalid DOCX", e))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| extraction_err("DOCX without word/document.xml", e))?
        .read_to_string(&mut xml)
        .map_err(|e| extraction_err("unreadable word/document.xml", e))?;
    parse_document_xml(&xml)
}

fn parse_document_xml(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:p" => current.clear(),
                b"w:t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:tab" => current.push(' '),
                b"w:br"  => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                let text = e.unescape().map_err(|e| extraction_err("bad DOCX text", e))?;
                current.push_str(&text);
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(extraction_err("malformed word/document.xml", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs.join("\n\n"))
}

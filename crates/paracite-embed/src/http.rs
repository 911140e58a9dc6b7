//! HTTP embedding backends.
//!
//! Supports:
//!   - OpenAI         (text-embedding-3-small / text-embedding-3-large)
//!   - OpenAI-compat  (any /v1/embeddings endpoint: Together, LM Studio, vLLM, …)
//!   - Ollama         (all-minilm, nomic-embed-text or any ollama embedding model)

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{validate_vectors, EmbedError, Embedder, Result};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

// ── Backend config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpEmbeddingBackend {
    OpenAi,
    OpenAiCompatible,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEmbeddingConfig {
    pub backend:  HttpEmbeddingBackend,
    pub model:    String,
    /// Known vector length; `None` accepts whatever the service returns.
    pub dim:      Option<usize>,
    pub base_url: Option<String>,  // for compat/ollama
}

impl Default for HttpEmbeddingConfig {
    fn default() -> Self {
        Self {
            backend:  HttpEmbeddingBackend::Ollama,
            model:    "all-minilm".to_string(),
            dim:      Some(384),
            base_url: None,
        }
    }
}

// ── Embedder ──────────────────────────────────────────────────────────────────

pub struct HttpEmbedder {
    cfg:     HttpEmbeddingConfig,
    api_key: Option<SecretString>,
    client:  reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(cfg: HttpEmbeddingConfig, api_key: Option<SecretString>) -> Self {
        Self { cfg, api_key, client: reqwest::Client::new() }
    }

    async fn embed_openai_style(&self, url: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": &self.cfg.model,
            "input": texts,
        });
        let mut req = self.client.post(url).json(&body);
        if let Some(ref k) = self.api_key {
            req = req.bearer_auth(k.expose_secret());
        }
        let resp = check_response_status(req.send().await?).await?;
        Ok(parse_openai_embeddings(&resp))
    }

    // Ollama's legacy endpoint takes one prompt per request.
    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let base = self.cfg.base_url.as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/');
        let url = format!("{}/api/embeddings", base);
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let body = serde_json::json!({"model": &self.cfg.model, "prompt": text});
            let resp = check_response_status(
                self.client.post(&url).json(&body).send().await?
            ).await?;
            out.push(json_to_vector(&resp["embedding"]));
        }
        Ok(out)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    #[instrument(skip(self, texts), fields(n = texts.len(), backend = ?self.cfg.backend))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(vec![]); }
        let vectors = match self.cfg.backend {
            HttpEmbeddingBackend::OpenAi => {
                self.embed_openai_style(OPENAI_EMBEDDINGS_URL, texts).await?
            }
            HttpEmbeddingBackend::OpenAiCompatible => {
                let base = self.cfg.base_url.as_deref()
                    .unwrap_or("http://localhost:11434")
                    .trim_end_matches('/');
                self.embed_openai_style(&format!("{}/v1/embeddings", base), texts).await?
            }
            HttpEmbeddingBackend::Ollama => self.embed_ollama(texts).await?,
        };

        let dim = validate_vectors(&vectors, texts.len())?;
        if let Some(expected) = self.cfg.dim {
            if dim != expected {
                return Err(EmbedError::InvalidOutput(format!(
                    "model {} returned dimension {dim}, expected {expected}",
                    self.cfg.model
                )));
            }
        }
        debug!(dim, "Embedded batch");
        Ok(vectors)
    }

    fn model_id(&self) -> &str { &self.cfg.model }
    fn dimension(&self) -> Option<usize> { self.cfg.dim }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn check_response_status(resp: reqwest::Response) -> Result<serde_json::Value> {
    let status = resp.status().as_u16();
    if status == 429 {
        return Err(EmbedError::RateLimited);
    }
    let text = resp.text().await?;
    if status >= 400 {
        let message = serde_json::from_str::<serde_json::Value>(&text).ok()
            .and_then(|b| b["error"]["message"].as_str()
                .or_else(|| b["error"].as_str())
                .map(str::to_string))
            .unwrap_or(text);
        return Err(EmbedError::Api { status, message });
    }
    Ok(serde_json::from_str(&text)?)
}

fn json_to_vector(value: &serde_json::Value) -> Vec<f32> {
    value.as_array()
        .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        .unwrap_or_default()
}

/// `data` entries carry an `index`; order by it rather than trusting array order.
fn parse_openai_embeddings(resp: &serde_json::Value) -> Vec<Vec<f32>> {
    let mut rows: Vec<(u64, Vec<f32>)> = resp["data"].as_array()
        .map(|items| items.iter().enumerate()
            .map(|(pos, item)| (
                item["index"].as_u64().unwrap_or(pos as u64),
                json_to_vector(&item["embedding"]),
            ))
            .collect())
        .unwrap_or_default();
    rows.sort_by_key(|(i, _)| *i);
    rows.into_iter().map(|(_, v)| v).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Configuration loading for the paracite CLI.
//! Reads paracite.toml from the current directory or the path in PARACITE_CONFIG.
//! API keys may live in the file or in PARACITE_*_API_KEY environment variables.

use std::path::Path;

use anyhow::Context;
use paracite_pipeline::config::ARXIV_RATE_LIMIT_RPS;
use paracite_pipeline::PipelineConfig;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "paracite.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub search: SearchSettings,
}

// ── LLM ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Openrouter,
    Openai,
    Anthropic,
    Ollama,
    OpenaiCompatible,
}

#[derive(Debug, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_provider")]
    pub provider: LlmProvider,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Required for `ollama` and `openai_compatible`.
    pub base_url: Option<String>,
    /// Plain text here; wrapped in a secret as soon as it is resolved.
    pub api_key: Option<String>,
}

fn default_llm_provider() -> LlmProvider { LlmProvider::Openrouter }
fn default_llm_model()    -> String      { "nvidia/nemotron-nano-9b-v2:free".to_string() }

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model:    default_llm_model(),
            base_url: None,
            api_key:  None,
        }
    }
}

impl LlmSettings {
    /// Environment variable consulted when `api_key` is not in the file.
    pub fn key_env_var(&self) -> &'static str {
        match self.provider {
            LlmProvider::Openrouter       => "PARACITE_OPENROUTER_API_KEY",
            LlmProvider::Openai           => "PARACITE_OPENAI_API_KEY",
            LlmProvider::Anthropic        => "PARACITE_ANTHROPIC_API_KEY",
            LlmProvider::Ollama           => "PARACITE_OLLAMA_API_KEY",
            LlmProvider::OpenaiCompatible => "PARACITE_COMPAT_API_KEY",
        }
    }
}

// ── Embeddings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    Ollama,
    Openai,
    OpenaiCompatible,
    /// In-process MiniLM; needs the `local` feature.
    Local,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embed_provider")]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_embed_dim")]
    pub dim: Option<usize>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

fn default_embed_provider() -> EmbeddingProvider { EmbeddingProvider::Ollama }
fn default_embed_model()    -> String            { "all-minilm".to_string() }
fn default_embed_dim()      -> Option<usize>     { Some(384) }

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model:    default_embed_model(),
            dim:      default_embed_dim(),
            base_url: None,
            api_key:  None,
        }
    }
}

// ── Search ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Arxiv,
    Crossref,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_search_source")]
    pub source: SearchSource,
    /// Contact address for CrossRef's polite pool.
    pub mailto: Option<String>,
    /// Override the service endpoint (mirrors, tests).
    pub base_url: Option<String>,
}

fn default_search_source() -> SearchSource { SearchSource::Arxiv }

impl Default for SearchSettings {
    fn default() -> Self {
        Self { source: default_search_source(), mailto: None, base_url: None }
    }
}

mod tests;

impl Config {
    /// Load configuration from paracite.toml.
    /// Checks PARACITE_CONFIG first, then the current directory. A missing
    /// default file means built-in defaults; a missing explicit path is an error.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var("PARACITE_CONFIG") {
            Ok(path) => Self::from_file(&path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            Err(_) => {
                warn!("No {DEFAULT_CONFIG_PATH} found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy paracite.example.toml to paracite.toml and edit it.",
                path
            );
        }
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let config = Self::from_toml_str(&content).with_context(|| format!("parsing {path}"))?;
        info!(path, "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Pipeline settings with source-specific limits applied: arXiv asks for
    /// at most one request every three seconds.
    pub fn effective_pipeline(&self) -> PipelineConfig {
        let mut pipeline = self.pipeline.clone();
        if self.search.source == SearchSource::Arxiv && pipeline.search_rate_limit_rps > ARXIV_RATE_LIMIT_RPS {
            info!(
                requested = pipeline.search_rate_limit_rps,
                applied = ARXIV_RATE_LIMIT_RPS,
                "Capping search rate for arXiv"
            );
            pipeline.search_rate_limit_rps = ARXIV_RATE_LIMIT_RPS;
        }
        pipeline
    }
}

/// Key from the file if present, otherwise from `env_var` (empty values ignored).
pub fn resolve_api_key(from_file: Option<&str>, env_var: &str) -> Option<SecretString> {
    from_file
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .filter(|k| !k.trim().is_empty())
        .map(SecretString::from)
}

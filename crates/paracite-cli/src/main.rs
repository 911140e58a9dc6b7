//! paracite — citation recommendations for every paragraph of a document.
//! Entry point for the command-line binary.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use paracite_embed::{Embedder, HttpEmbedder, HttpEmbeddingBackend, HttpEmbeddingConfig};
use paracite_llm::{AnthropicBackend, LlmBackend, OpenAiCompatibleBackend};
use paracite_pipeline::models::PipelineStage;
use paracite_pipeline::{
    ArxivSource, BibliographicSource, CitationPipeline, CrossRefSource, DefaultExtractor,
    DocumentFormat, PipelineServices, RunOptions, TextExtractor,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{resolve_api_key, Config, EmbeddingProvider, LlmProvider, SearchSource};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Pdf,
    Docx,
    Text,
}

impl From<FormatArg> for DocumentFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Pdf  => DocumentFormat::Pdf,
            FormatArg::Docx => DocumentFormat::Docx,
            FormatArg::Text => DocumentFormat::Text,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "paracite", version, about = "Recommend citations for each paragraph of a document")]
struct Cli {
    /// Document to analyse (PDF, DOCX or plain text)
    file: PathBuf,

    /// Input format; guessed from the file extension when omitted
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Citations per paragraph (overrides the config file)
    #[arg(long)]
    top_k: Option<usize>,

    /// On Ctrl-C, print the paragraphs finished so far instead of failing
    #[arg(long)]
    partial: bool,
}

// ── Service wiring ────────────────────────────────────────────────────────────

fn build_llm(config: &Config) -> anyhow::Result<Arc<dyn LlmBackend>> {
    let llm = &config.llm;
    let key = resolve_api_key(llm.api_key.as_deref(), llm.key_env_var());
    let missing_key = || {
        anyhow::anyhow!(
            "{:?} configured but no API key found (set llm.api_key or {})",
            llm.provider,
            llm.key_env_var()
        )
    };

    let backend: Arc<dyn LlmBackend> = match llm.provider {
        LlmProvider::Openrouter => Arc::new(OpenAiCompatibleBackend::openrouter(key.ok_or_else(missing_key)?, &llm.model)),
        LlmProvider::Openai     => Arc::new(OpenAiCompatibleBackend::openai(key.ok_or_else(missing_key)?, &llm.model)),
        LlmProvider::Anthropic  => Arc::new(AnthropicBackend::new(key.ok_or_else(missing_key)?, &llm.model)),
        LlmProvider::Ollama => {
            let base_url = llm.base_url.as_deref().unwrap_or("http://localhost:11434");
            Arc::new(OpenAiCompatibleBackend::ollama(base_url, &llm.model))
        }
        LlmProvider::OpenaiCompatible => {
            let base_url = llm.base_url.as_deref()
                .context("llm.base_url is required for openai_compatible")?;
            Arc::new(OpenAiCompatibleBackend::new(base_url, &llm.model, key))
        }
    };
    info!(provider = ?llm.provider, model = %llm.model, "LLM backend ready");
    Ok(backend)
}

async fn build_embedder(config: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    let emb = &config.embedding;
    let http = |backend: HttpEmbeddingBackend| HttpEmbeddingConfig {
        backend,
        model: emb.model.clone(),
        dim: emb.dim,
        base_url: emb.base_url.clone(),
    };

    let embedder: Arc<dyn Embedder> = match emb.provider {
        EmbeddingProvider::Ollama => Arc::new(HttpEmbedder::new(http(HttpEmbeddingBackend::Ollama), None)),
        EmbeddingProvider::Openai => {
            let key = resolve_api_key(emb.api_key.as_deref(), "PARACITE_EMBEDDING_API_KEY")
                .or_else(|| resolve_api_key(None, "PARACITE_OPENAI_API_KEY"))
                .context("OpenAI embeddings need embedding.api_key or PARACITE_EMBEDDING_API_KEY")?;
            Arc::new(HttpEmbedder::new(http(HttpEmbeddingBackend::OpenAi), Some(key)))
        }
        EmbeddingProvider::OpenaiCompatible => {
            if emb.base_url.is_none() {
                anyhow::bail!("embedding.base_url is required for openai_compatible");
            }
            let key = resolve_api_key(emb.api_key.as_deref(), "PARACITE_EMBEDDING_API_KEY");
            Arc::new(HttpEmbedder::new(http(HttpEmbeddingBackend::OpenAiCompatible), key))
        }
        EmbeddingProvider::Local => build_local_embedder().await?,
    };
    info!(provider = ?emb.provider, model = embedder.model_id(), "Embedder ready");
    Ok(embedder)
}

#[cfg(feature = "local")]
async fn build_local_embedder() -> anyhow::Result<Arc<dyn Embedder>> {
    use paracite_embed::{LocalEmbeddingConfig, MiniLmEmbedder};
    let embedder = MiniLmEmbedder::load(LocalEmbeddingConfig::default())
        .await
        .context("loading local embedding model")?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "local"))]
async fn build_local_embedder() -> anyhow::Result<Arc<dyn Embedder>> {
    anyhow::bail!("embedding.provider = \"local\" needs a build with `--features local`")
}

fn build_source(config: &Config) -> Arc<dyn BibliographicSource> {
    let search = &config.search;
    match search.source {
        SearchSource::Arxiv => match search.base_url {
            Some(ref url) => Arc::new(ArxivSource::with_base_url(url.clone())),
            None => Arc::new(ArxivSource::new()),
        },
        SearchSource::Crossref => {
            let source = CrossRefSource::new(search.mailto.as_deref());
            match search.base_url {
                Some(ref url) => Arc::new(source.with_base_url(url.clone())),
                None => Arc::new(source),
            }
        }
    }
}

/// Log progress events until the channel closes.
fn spawn_progress_logger(mut rx: broadcast::Receiver<paracite_pipeline::PipelineProgress>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.stage == PipelineStage::ParagraphDone => {
                    info!(
                        paragraph = ev.paragraph_index,
                        done = ev.paragraphs_done,
                        total = ev.paragraphs_total,
                        degraded = ev.degraded,
                        "Paragraph finished"
                    );
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "Progress logger lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paracite=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "paracite starting");

    let mut config = Config::load()?;
    if let Some(top_k) = cli.top_k {
        config.pipeline.top_k = top_k;
    }

    let format = match cli.format {
        Some(f) => f.into(),
        None => cli.file
            .extension()
            .and_then(|e| e.to_str())
            .map(DocumentFormat::from_extension)
            .unwrap_or(DocumentFormat::Text),
    };

    let bytes = std::fs::read(&cli.file)
        .with_context(|| format!("reading {}", cli.file.display()))?;
    let text = DefaultExtractor.extract(&bytes, format)?;

    let services = PipelineServices {
        llm: build_llm(&config)?,
        source: build_source(&config),
        embedder: build_embedder(&config).await?,
    };
    let pipeline = CitationPipeline::new(config.effective_pipeline(), services)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling pipeline");
                cancel.cancel();
            }
        });
    }

    let (progress_tx, progress_rx) = broadcast::channel(256);
    spawn_progress_logger(progress_rx);

    let opts = RunOptions { cancel, partial_on_cancel: cli.partial, progress: Some(progress_tx) };
    let result = pipeline.run(&text, format, opts).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

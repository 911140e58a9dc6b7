//! all-MiniLM-L6-v2 sentence embeddings via Candle.

use std::time::Instant;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::pooling::{l2_normalize, mean_pool};
use crate::{EmbedError, Embedder, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEmbeddingConfig {
    pub model_id:   String,
    pub max_length: usize,
    pub batch_size: usize,
    pub use_gpu:    bool,
}

impl Default for LocalEmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id:   "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            max_length: 256,
            batch_size: 32,
            use_gpu:    false,
        }
    }
}

pub struct MiniLmEmbedder {
    model:     BertModel,
    tokenizer: Tokenizer,
    device:    Device,
    config:    LocalEmbeddingConfig,
    dim:       usize,
}

impl MiniLmEmbedder {
    /// Download (or reuse the hub cache for) the model files and load weights.
    pub async fn load(config: LocalEmbeddingConfig) -> Result<Self> {
        let start = Instant::now();
        info!(model = %config.model_id, "Loading sentence embedding model");

        let device = select_device(&config);

        let model_id = config.model_id.clone();
        let (bert_config, tokenizer, weights_path) = tokio::task::spawn_blocking(move || {
            let api = Api::new()?;
            let repo = api.repo(Repo::new(model_id, RepoType::Model));

            let config_path = repo.get("config.json")?;
            let bert_config: Config = serde_json::from_str(&std::fs::read_to_string(config_path)?)?;

            let tokenizer = Tokenizer::from_file(repo.get("tokenizer.json")?)?;
            let weights_path = repo.get("model.safetensors")?;

            Ok::<_, EmbedError>((bert_config, tokenizer, weights_path))
        }).await.map_err(|e| EmbedError::Download(e.to_string()))??;

        // SAFETY: the safetensors file lives in the hub cache and is not
        // modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&weights_path], DType::F32, &device)? };
        let model = BertModel::load(vb, &bert_config)
            .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;

        info!(
            dim = bert_config.hidden_size,
            elapsed_s = start.elapsed().as_secs_f32(),
            "Embedding model loaded"
        );

        Ok(Self { model, tokenizer, device, dim: bert_config.hidden_size, config })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = self.tokenizer.encode_batch(refs, true)?;

        let max_len = self.config.max_length.min(512);
        let mut ids:   Vec<Vec<u32>> = Vec::with_capacity(texts.len());
        let mut mask:  Vec<Vec<u32>> = Vec::with_capacity(texts.len());
        let mut types: Vec<Vec<u32>> = Vec::with_capacity(texts.len());
        for enc in &encodings {
            let len = enc.get_ids().len().min(max_len);
            ids.push(enc.get_ids()[..len].to_vec());
            mask.push(enc.get_attention_mask()[..len].to_vec());
            types.push(enc.get_type_ids()[..len].to_vec());
        }

        let seq_len = ids.iter().map(Vec::len).max().unwrap_or(0);
        for ((i, m), t) in ids.iter_mut().zip(mask.iter_mut()).zip(types.iter_mut()) {
            let pad = seq_len - i.len();
            i.extend(std::iter::repeat_n(0, pad));
            m.extend(std::iter::repeat_n(0, pad));
            t.extend(std::iter::repeat_n(0, pad));
        }

        let batch = texts.len();
        let input_ids = Tensor::new(ids, &self.device)?.reshape((batch, seq_len))?;
        let token_type_ids = Tensor::new(types, &self.device)?.reshape((batch, seq_len))?;
        let attention_mask = Tensor::new(mask, &self.device)?
            .reshape((batch, seq_len))?
            .to_dtype(DType::F32)?;

        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = l2_normalize(&mean_pool(&hidden, &attention_mask)?)?;
        Ok(pooled.to_vec2::<f32>()?)
    }
}

#[async_trait]
impl Embedder for MiniLmEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            out.extend(self.embed_batch(chunk)?);
        }
        debug!(
            n = texts.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Embedded texts locally"
        );
        Ok(out)
    }

    fn model_id(&self) -> &str { &self.config.model_id }
    fn dimension(&self) -> Option<usize> { Some(self.dim) }
}

fn select_device(config: &LocalEmbeddingConfig) -> Device {
    if !config.use_gpu {
        return Device::Cpu;
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => debug!("CUDA not available: {}, falling back to CPU", e),
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => debug!("Metal not available: {}, falling back to CPU", e),
        }
    }

    Device::Cpu
}

//! Error types for the embedding service.

use paracite_common::ServiceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbedError>;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error [{status}]: {message}")]
    Api { status: u16, message: String },

    /// The service answered, but the vectors are unusable (wrong count,
    /// ragged or empty dimensions).
    #[error("Invalid embedding output: {0}")]
    InvalidOutput(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Model download failed: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<EmbedError> for ServiceError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::RateLimited => ServiceError::RateLimited(e.to_string()),
            EmbedError::Http(_) => ServiceError::Network(e.to_string()),
            EmbedError::Api { status, .. } if status >= 500 => ServiceError::Network(e.to_string()),
            _ => ServiceError::Embedding(e.to_string()),
        }
    }
}

#[cfg(feature = "local")]
impl From<candle_core::Error> for EmbedError {
    fn from(e: candle_core::Error) -> Self {
        EmbedError::Inference(e.to_string())
    }
}

#[cfg(feature = "local")]
impl From<tokenizers::Error> for EmbedError {
    fn from(e: tokenizers::Error) -> Self {
        EmbedError::Tokenizer(e.to_string())
    }
}

#[cfg(feature = "local")]
impl From<hf_hub::api::sync::ApiError> for EmbedError {
    fn from(e: hf_hub::api::sync::ApiError) -> Self {
        EmbedError::Download(e.to_string())
    }
}

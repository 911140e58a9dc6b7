//! paracite-llm — LLM backend abstraction used for keyword and summary
//! extraction.
//!
//! Backends:
//!   OpenAiCompatibleBackend — any OpenAI-style `/v1/chat/completions`
//!                             endpoint (OpenAI, OpenRouter, Ollama, LM Studio, vLLM, …)
//!   AnthropicBackend        — Anthropic Messages API

pub mod backend;

pub use backend::{
    AnthropicBackend, LlmBackend, LlmError, LlmRequest, LlmResponse, Message,
    OpenAiCompatibleBackend,
};

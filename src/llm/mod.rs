//! LLM integration for reply generation.
//!
//! Supports:
//! - **HuggingFace**: hosted text-generation endpoint with a bearer token
//! - **Ollama**: local inference server via rig-core, no credentials
//! - **Template**: no provider at all; the generator answers from templates
//!
//! Every constructed provider is wrapped in a `RetryProvider`, so callers get
//! per-attempt timeouts and bounded retries for free.

pub mod huggingface;
pub mod provider;
pub mod retry;
mod rig_adapter;

pub use huggingface::HuggingFaceProvider;
pub use provider::*;
pub use retry::{RetryConfig, RetryProvider};
pub use rig_adapter::RigAdapter;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, LlmError, Result};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "mistral";

/// Supported generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[serde(alias = "huggingface-api")]
    HuggingFace,
    Ollama,
    #[serde(alias = "fallback")]
    Template,
}

impl LlmBackend {
    /// Parse a configuration value. Unknown values return `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "huggingface-api" | "huggingface" | "hf" => Some(Self::HuggingFace),
            "ollama" | "local" => Some(Self::Ollama),
            "template" | "fallback" | "none" => Some(Self::Template),
            _ => None,
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HuggingFace => "huggingface-api",
            Self::Ollama => "ollama",
            Self::Template => "template",
        };
        write!(f, "{s}")
    }
}

/// Configuration for creating LLM providers.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Default backend for every request.
    pub backend: LlmBackend,
    pub api_key: Option<SecretString>,
    pub hf_model: String,
    pub hf_url: String,
    /// Local server address; `None` means only enabled when `backend` is Ollama.
    pub ollama_url: Option<String>,
    pub ollama_model: String,
    pub retry: RetryConfig,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Generated replies are cut to this many characters.
    pub max_reply_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::HuggingFace,
            api_key: None,
            hf_model: huggingface::DEFAULT_HF_MODEL.to_string(),
            hf_url: hosted_model_url(huggingface::DEFAULT_HF_MODEL),
            ollama_url: None,
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            retry: RetryConfig::default(),
            max_new_tokens: 150,
            temperature: 0.7,
            top_p: 0.9,
            max_reply_chars: 300,
        }
    }
}

/// Hosted inference URL for a model id.
pub fn hosted_model_url(model: &str) -> String {
    format!("{}/{model}", crate::sentiment::DEFAULT_INFERENCE_BASE_URL)
}

/// Create one provider, or `None` if the backend is not usable with this config.
pub fn create_provider(backend: LlmBackend, config: &LlmConfig) -> Option<Arc<dyn LlmProvider>> {
    let created = match backend {
        LlmBackend::HuggingFace => create_huggingface_provider(config),
        LlmBackend::Ollama => create_ollama_provider(config),
        LlmBackend::Template => return None,
    };
    match created {
        Ok(provider) => Some(Arc::new(RetryProvider::new(provider, config.retry))),
        Err(e) => {
            tracing::warn!(%backend, "Provider disabled: {}", e);
            None
        }
    }
}

fn create_huggingface_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let api_key = config.api_key.clone().ok_or_else(|| ConfigError::MissingRequired {
        key: "HF_API_KEY".to_string(),
        hint: "Set it to enable the hosted provider".to_string(),
    })?;
    tracing::info!("Using HuggingFace (model: {})", config.hf_model);
    Ok(Arc::new(HuggingFaceProvider::new(&config.hf_url, &config.hf_model, api_key)))
}

fn create_ollama_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    use rig::client::Nothing;
    use rig::providers::ollama;

    let url = config
        .ollama_url
        .as_deref()
        .unwrap_or(DEFAULT_OLLAMA_URL)
        .trim_end_matches('/')
        .to_string();
    let client: ollama::Client = ollama::Client::builder()
        .api_key(Nothing)
        .base_url(&url)
        .build()
        .map_err(|e| LlmError::RequestFailed {
            provider: "ollama".to_string(),
            reason: format!("Failed to create Ollama client: {}", e),
        })?;
    let model = client.completion_model(&config.ollama_model);
    tracing::info!("Using Ollama at {} (model: {})", url, config.ollama_model);
    Ok(Arc::new(RigAdapter::new(model, "ollama", &config.ollama_model)))
}

/// Create every provider the configuration enables, keyed by backend.
pub fn create_providers(config: &LlmConfig) -> HashMap<LlmBackend, Arc<dyn LlmProvider>> {
    let mut providers = HashMap::new();
    let wants_ollama = config.backend == LlmBackend::Ollama || config.ollama_url.is_some();
    let wants_hosted = config.backend == LlmBackend::HuggingFace || config.api_key.is_some();

    if wants_hosted {
        if let Some(p) = create_provider(LlmBackend::HuggingFace, config) {
            providers.insert(LlmBackend::HuggingFace, p);
        }
    }
    if wants_ollama {
        if let Some(p) = create_provider(LlmBackend::Ollama, config) {
            providers.insert(LlmBackend::Ollama, p);
        }
    }
    providers
}

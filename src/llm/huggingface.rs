//! Hosted inference provider (text-generation endpoint, bearer token auth).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use crate::error::LlmError;

const PROVIDER: &str = "huggingface";

/// Default chat model served by the hosted endpoint.
pub const DEFAULT_HF_MODEL: &str = "meta-llama/Llama-2-7b-chat-hf";

/// Hosted text-generation provider.
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: SecretString,
}

impl HuggingFaceProvider {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    #[serde(default)]
    generated_text: String,
}

#[async_trait]
impl LlmProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let inputs = format_llama2_prompt(&request.system_prompt(), &request.user_prompt());

        let mut parameters = serde_json::json!({ "return_full_text": false });
        if let Some(max_tokens) = request.max_tokens {
            parameters["max_new_tokens"] = max_tokens.into();
        }
        if let Some(temperature) = request.temperature {
            parameters["temperature"] = temperature.into();
        }
        if let Some(top_p) = request.top_p {
            parameters["top_p"] = top_p.into();
        }
        let body = serde_json::json!({ "inputs": inputs, "parameters": parameters });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(LlmError::AuthFailed {
                    provider: PROVIDER.into(),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(LlmError::RateLimited {
                    provider: PROVIDER.into(),
                    retry_after,
                });
            }
            s if s.is_server_error() => {
                return Err(LlmError::ServerError {
                    provider: PROVIDER.into(),
                    status: s.as_u16(),
                });
            }
            s => {
                let detail = response.text().await.unwrap_or_default();
                return Err(LlmError::InvalidResponse {
                    provider: PROVIDER.into(),
                    reason: format!("HTTP {s}: {detail}"),
                });
            }
        }

        let generated: Vec<GeneratedText> =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let raw = generated
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "empty generation list".into(),
            })?;

        let content = strip_prompt_echo(&raw);
        debug!(chars = content.len(), "Hosted generation complete");

        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Unknown,
        })
    }
}

/// Llama-2 chat formatting.
pub fn format_llama2_prompt(system_prompt: &str, user_prompt: &str) -> String {
    format!("[INST] <<SYS>>\n{system_prompt}\n<</SYS>>\n\n{user_prompt}\n[/INST]")
}

/// Drop anything the model echoed before its own turn.
fn strip_prompt_echo(generated: &str) -> String {
    let after_inst = generated.rsplit("[/INST]").next().unwrap_or(generated);
    let after_speaker = after_inst.rsplit("Assistant:").next().unwrap_or(after_inst);
    after_speaker.trim().to_string()
}

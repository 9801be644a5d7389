//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::completion::message::AssistantContent;

use super::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use crate::error::LlmError;

/// Adapter over any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    provider: &'static str,
    model_name: String,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel,
{
    pub fn new(model: M, provider: &'static str, model_name: impl Into<String>) -> Self {
        Self {
            model,
            provider,
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.provider
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut builder = self
            .model
            .completion_request(request.user_prompt())
            .preamble(request.system_prompt());
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: e.to_string(),
        })?;

        let content = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content: content.trim().to_string(),
            finish_reason: FinishReason::Unknown,
        })
    }
}

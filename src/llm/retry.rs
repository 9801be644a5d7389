//! Timeout and bounded retry around any provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use super::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::error::LlmError;

/// Upper bound on any single backoff sleep, including server-provided hints.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Retry policy for provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt (transient failures only).
    pub max_retries: u32,
    /// Base delay, doubled per retry, plus up to 50% jitter.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, retry: u32, error: &LlmError) -> Duration {
        if let LlmError::RateLimited {
            retry_after: Some(after),
            ..
        } = error
        {
            return (*after).min(MAX_BACKOFF);
        }
        let base = self.backoff.saturating_mul(2u32.saturating_pow(retry));
        let jitter_ms = match base.as_millis() as u64 / 2 {
            0 => 0,
            max => rand::thread_rng().gen_range(0..=max),
        };
        (base + Duration::from_millis(jitter_ms)).min(MAX_BACKOFF)
    }
}

/// Wraps a provider with per-attempt timeouts and bounded retries.
pub struct RetryProvider {
    inner: Arc<dyn LlmProvider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmProvider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut retry = 0;
        loop {
            let call = self.inner.complete(request.clone());
            let attempt = tokio::time::timeout(self.config.timeout, call)
                .await
                .unwrap_or_else(|_| {
                    Err(LlmError::Timeout {
                        provider: self.inner.name().to_string(),
                        timeout: self.config.timeout,
                    })
                });

            match attempt {
                Ok(response) => {
                    if retry > 0 {
                        debug!(
                            provider = self.inner.name(),
                            retry,
                            "Provider succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(e) if e.is_transient() && retry < self.config.max_retries => {
                    let delay = self.config.delay_for(retry, &e);
                    warn!(
                        provider = self.inner.name(),
                        attempt = retry + 1,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//! Error types for the wellness chat core.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Sentiment error: {0}")]
    Sentiment(#[from] SentimentError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Safety error: {0}")]
    Safety(#[from] SafetyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Inbound message rejected before any scoring happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Message cannot be empty")]
    Empty,

    #[error("Message too long ({length} characters, max {max})")]
    TooLong { length: usize, max: usize },
}

/// Sentiment model errors. Never fatal to a chat request.
#[derive(Debug, thiserror::Error)]
pub enum SentimentError {
    #[error("Sentiment model {model} unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("Sentiment model {model} timed out after {timeout:?}")]
    Timeout { model: String, timeout: Duration },

    #[error("Invalid response from sentiment model {model}: {reason}")]
    InvalidResponse { model: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} returned server error {status}")]
    ServerError { provider: String, status: u16 },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl LlmError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::ServerError { .. }
        )
    }
}

/// Safety/risk assessment errors.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("Invalid risk pattern '{term}': {reason}")]
    InvalidPattern { term: String, reason: String },

    #[error("Risk assessment could not run: {reason}")]
    AssessmentFailed { reason: String },
}

/// Orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Pipeline cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let timeout = LlmError::Timeout {
            provider: "ollama".into(),
            timeout: Duration::from_secs(10),
        };
        let server = LlmError::ServerError {
            provider: "huggingface".into(),
            status: 503,
        };
        assert!(timeout.is_transient());
        assert!(server.is_transient());
    }

    #[test]
    fn auth_and_parse_errors_are_not_retryable() {
        let auth = LlmError::AuthFailed {
            provider: "huggingface".into(),
        };
        let invalid = LlmError::InvalidResponse {
            provider: "ollama".into(),
            reason: "missing field".into(),
        };
        assert!(!auth.is_transient());
        assert!(!invalid.is_transient());
    }

    #[test]
    fn validation_error_messages() {
        assert_eq!(ValidationError::Empty.to_string(), "Message cannot be empty");
        assert_eq!(
            ValidationError::TooLong {
                length: 5001,
                max: 5000
            }
            .to_string(),
            "Message too long (5001 characters, max 5000)"
        );
    }
}

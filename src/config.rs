//! Configuration types.
//!
//! Everything is read from the environment (after loading `.env`). Missing
//! keys take defaults; malformed values are errors.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use tracing::warn;

use crate::error::ConfigError;
use crate::llm::{self, LlmBackend, LlmConfig, RetryConfig};
use crate::pipeline::PipelineLimits;
use crate::safety::EscalationPolicy;
use crate::sentiment::{self, Device, SentimentBackend, SentimentConfig};

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineLimits,
    pub sentiment: SentimentConfig,
    pub llm: LlmConfig,
    pub escalation: EscalationPolicy,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let api_key = vars.get("HF_API_KEY").map(SecretString::from);

        let server = ServerConfig {
            host: vars.string("WELLNESS_HOST", "0.0.0.0"),
            port: vars.parse("WELLNESS_PORT", 8000)?,
        };

        let defaults = PipelineLimits::default();
        let pipeline = PipelineLimits {
            max_message_chars: vars
                .parse("WELLNESS_MAX_MESSAGE_CHARS", defaults.max_message_chars)?,
            max_history_turns: vars
                .parse("WELLNESS_MAX_HISTORY_TURNS", defaults.max_history_turns)?,
            context_window_turns: vars
                .parse("WELLNESS_CONTEXT_WINDOW_TURNS", defaults.context_window_turns)?,
        };
        at_least_one("WELLNESS_MAX_MESSAGE_CHARS", pipeline.max_message_chars)?;
        at_least_one("WELLNESS_MAX_HISTORY_TURNS", pipeline.max_history_turns)?;

        let sentiment_backend = match vars.get("SENTIMENT_BACKEND") {
            None => SentimentBackend::Lexicon,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "lexicon" | "builtin" => SentimentBackend::Lexicon,
                "huggingface" | "hf" => SentimentBackend::HuggingFace,
                _ => return Err(invalid("SENTIMENT_BACKEND", format!("unknown backend '{v}'"))),
            },
        };
        let sentiment_model = vars.string("SENTIMENT_MODEL", sentiment::DEFAULT_SENTIMENT_MODEL);
        let device = match vars.get("SENTIMENT_DEVICE") {
            None => Device::Cpu,
            Some(v) => Device::parse(&v).ok_or_else(|| {
                invalid("SENTIMENT_DEVICE", format!("expected cpu or gpu, got '{v}'"))
            })?,
        };
        let sentiment = SentimentConfig {
            backend: sentiment_backend,
            url: format!("{}/{sentiment_model}", sentiment::DEFAULT_INFERENCE_BASE_URL),
            model: sentiment_model,
            device,
            api_key: api_key.clone(),
            timeout: Duration::from_secs(vars.parse("SENTIMENT_TIMEOUT_SECS", 5)?),
        };

        let escalation = EscalationPolicy {
            enabled: vars.flag("RISK_ESCALATION_ENABLED", true)?,
            min_negative_score: vars.parse("RISK_ESCALATION_MIN_NEGATIVE_SCORE", 0.80)?,
            min_medium_matches: vars.parse("RISK_ESCALATION_MIN_MEDIUM_MATCHES", 2)?,
        };
        if !(0.0..=1.0).contains(&escalation.min_negative_score) {
            return Err(invalid(
                "RISK_ESCALATION_MIN_NEGATIVE_SCORE",
                "must be between 0 and 1",
            ));
        }
        at_least_one("RISK_ESCALATION_MIN_MEDIUM_MATCHES", escalation.min_medium_matches)?;

        let backend = match vars.get("LLM_PROVIDER") {
            None => LlmBackend::HuggingFace,
            Some(v) => LlmBackend::parse(&v).unwrap_or_else(|| {
                warn!(provider = %v, "Unknown LLM_PROVIDER, using templates");
                LlmBackend::Template
            }),
        };
        let hf_model = vars.string("HF_MODEL", llm::huggingface::DEFAULT_HF_MODEL);
        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            backend,
            api_key,
            hf_url: vars
                .get("HF_API_URL")
                .unwrap_or_else(|| llm::hosted_model_url(&hf_model)),
            hf_model,
            ollama_url: vars.get("OLLAMA_URL"),
            ollama_model: vars.string("OLLAMA_MODEL", llm::DEFAULT_OLLAMA_MODEL),
            retry: RetryConfig {
                timeout: Duration::from_secs(vars.parse("LLM_TIMEOUT_SECS", 10)?),
                max_retries: vars.parse("LLM_MAX_RETRIES", 1)?,
                backoff: Duration::from_millis(vars.parse("LLM_RETRY_BACKOFF_MS", 500)?),
            },
            max_new_tokens: vars.parse("LLM_MAX_NEW_TOKENS", llm_defaults.max_new_tokens)?,
            temperature: vars.parse("LLM_TEMPERATURE", llm_defaults.temperature)?,
            top_p: vars.parse("LLM_TOP_P", llm_defaults.top_p)?,
            max_reply_chars: vars.parse("LLM_MAX_REPLY_CHARS", llm_defaults.max_reply_chars)?,
        };
        if llm.retry.timeout.is_zero() {
            return Err(invalid("LLM_TIMEOUT_SECS", "must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(invalid("LLM_TEMPERATURE", "must be between 0 and 2"));
        }
        if !(llm.top_p > 0.0 && llm.top_p <= 1.0) {
            return Err(invalid("LLM_TOP_P", "must be in (0, 1]"));
        }

        Ok(Self {
            server,
            pipeline,
            sentiment,
            llm,
            escalation,
        })
    }
}

// ── Lookup helpers ──────────────────────────────────────────────────

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|e: T::Err| invalid(key, format!("'{v}': {e}"))),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, format!("expected a boolean, got '{v}'"))),
            },
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn at_least_one(key: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(key, "must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.pipeline, PipelineLimits::default());
        assert_eq!(config.sentiment.backend, SentimentBackend::Lexicon);
        assert_eq!(config.sentiment.timeout, Duration::from_secs(5));
        assert_eq!(config.escalation, EscalationPolicy::default());
        assert_eq!(config.llm.backend, LlmBackend::HuggingFace);
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.llm.retry.max_retries, 1);
        assert_eq!(config.llm.max_reply_chars, 300);
        assert!(config.llm.hf_url.ends_with("meta-llama/Llama-2-7b-chat-hf"));
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("WELLNESS_PORT", "9001"),
            ("WELLNESS_MAX_HISTORY_TURNS", "6"),
            ("SENTIMENT_BACKEND", "huggingface"),
            ("SENTIMENT_DEVICE", "gpu"),
            ("HF_API_KEY", "hf-abc"),
            ("LLM_PROVIDER", "ollama"),
            ("OLLAMA_URL", "http://gpu-box:11434"),
            ("LLM_RETRY_BACKOFF_MS", "50"),
            ("RISK_ESCALATION_ENABLED", "false"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.pipeline.max_history_turns, 6);
        assert_eq!(config.sentiment.backend, SentimentBackend::HuggingFace);
        assert_eq!(config.sentiment.device, Device::Gpu);
        assert_eq!(
            config.sentiment.api_key.as_ref().unwrap().expose_secret(),
            "hf-abc"
        );
        assert_eq!(config.llm.backend, LlmBackend::Ollama);
        assert_eq!(config.llm.ollama_url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(config.llm.retry.backoff, Duration::from_millis(50));
        assert!(!config.escalation.enabled);
    }

    #[test]
    fn unknown_provider_selects_templates() {
        let config = load(&[("LLM_PROVIDER", "gpt-9000")]).unwrap();
        assert_eq!(config.llm.backend, LlmBackend::Template);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = load(&[("WELLNESS_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "WELLNESS_PORT"));

        let err = load(&[("LLM_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("LLM_TIMEOUT_SECS"));
    }

    #[test]
    fn escalation_bounds_are_validated() {
        assert!(load(&[("RISK_ESCALATION_MIN_NEGATIVE_SCORE", "1.5")]).is_err());
        assert!(load(&[("RISK_ESCALATION_MIN_MEDIUM_MATCHES", "0")]).is_err());
        assert!(load(&[("RISK_ESCALATION_ENABLED", "maybe")]).is_err());

        let config = load(&[("RISK_ESCALATION_MIN_NEGATIVE_SCORE", "0.95")]).unwrap();
        assert_eq!(config.escalation.min_negative_score, 0.95);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = load(&[("HF_API_KEY", "   "), ("WELLNESS_HOST", "")]).unwrap();
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn unknown_sentiment_settings_are_rejected() {
        assert!(load(&[("SENTIMENT_BACKEND", "vader")]).is_err());
        assert!(load(&[("SENTIMENT_DEVICE", "tpu")]).is_err());
    }
}

//! Sentiment analysis: binary polarity classification of user messages.
//!
//! The classifier is a black box behind [`SentimentModel`]:
//! - **Lexicon**: built-in polarity lexicon, offline and deterministic
//! - **Hosted**: SST-2 style classifier behind a hosted inference endpoint
//!
//! [`SentimentAnalyzer`] owns the model handle, bounds every call with a
//! timeout, and offers a degraded path that never fails the request.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SentimentError;

/// Classifier input window, in characters.
pub const MAX_CLASSIFIER_CHARS: usize = 512;

/// Default hosted classifier.
pub const DEFAULT_SENTIMENT_MODEL: &str = "distilbert-base-uncased-finetuned-sst-2-english";

/// Default hosted inference base URL (model id is appended).
pub const DEFAULT_INFERENCE_BASE_URL: &str = "https://api-inference.huggingface.co/models";

/// Score above which a label counts as "strong".
const STRONG_SCORE: f32 = 0.9;

// ── Results ─────────────────────────────────────────────────────────

/// Polarity label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SentimentLabel {
    Positive,
    Negative,
    /// Only produced when the model is unavailable.
    Neutral,
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Positive => "POSITIVE",
            Self::Negative => "NEGATIVE",
            Self::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

/// Label plus confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub label: SentimentLabel,
    pub score: f32,
}

impl SentimentResult {
    pub fn new(label: SentimentLabel, score: f32) -> Self {
        Self {
            label,
            score: if score.is_nan() { 0.5 } else { score.clamp(0.0, 1.0) },
        }
    }

    /// Degraded default used when the model cannot answer.
    pub fn neutral() -> Self {
        Self::new(SentimentLabel::Neutral, 0.5)
    }

    pub fn is_negative(&self) -> bool {
        self.label == SentimentLabel::Negative
    }

    /// Negative with at least `threshold` confidence.
    pub fn is_negative_at_least(&self, threshold: f32) -> bool {
        self.is_negative() && self.score >= threshold
    }

    /// Human-readable description of the detected emotion.
    pub fn insight(&self) -> &'static str {
        match self.label {
            SentimentLabel::Negative if self.score > STRONG_SCORE => {
                "User expressing strong negative emotions (distress, sadness, frustration)"
            }
            SentimentLabel::Negative => "User expressing negative emotions",
            SentimentLabel::Positive if self.score > STRONG_SCORE => {
                "User expressing positive emotions (optimism, contentment)"
            }
            _ => "User expressing mixed or neutral emotions",
        }
    }
}

// ── Model trait ─────────────────────────────────────────────────────

/// A pre-trained sentiment classifier.
///
/// Implementations are shared across concurrent requests and must not hold
/// per-request mutable state.
#[async_trait]
pub trait SentimentModel: Send + Sync {
    /// Model identifier for logs and health output.
    fn name(&self) -> &str;

    /// Classify `text` (already trimmed and truncated).
    async fn classify(&self, text: &str) -> Result<SentimentResult, SentimentError>;
}

// ── Lexicon model ───────────────────────────────────────────────────

const POSITIVE_WORDS: &[&str] = &[
    "happy", "glad", "great", "good", "wonderful", "amazing", "awesome", "fantastic",
    "excellent", "love", "loved", "lovely", "joy", "joyful", "excited", "exciting",
    "grateful", "thankful", "thanks", "calm", "relaxed", "peaceful", "proud", "hopeful",
    "better", "best", "fine", "okay", "content", "cheerful", "delighted", "thrilled",
    "optimistic", "confident", "enjoy", "enjoyed", "fun", "nice", "beautiful", "blessed",
    "motivated", "energized", "safe", "smile", "laugh", "celebrate", "improving",
];

const NEGATIVE_WORDS: &[&str] = &[
    "sad", "unhappy", "depressed", "depressing", "miserable", "hopeless", "helpless",
    "worthless", "lonely", "alone", "anxious", "anxiety", "worried", "worry", "stressed",
    "stress", "overwhelmed", "scared", "afraid", "terrified", "fear", "panic", "angry",
    "furious", "frustrated", "upset", "hurt", "hurting", "pain", "awful", "terrible",
    "horrible", "bad", "worse", "worst", "hate", "tired", "exhausted", "empty", "numb",
    "lost", "confused", "crying", "cry", "cried", "broken", "struggling", "suffering",
    "ashamed", "guilty", "trapped", "dying", "death", "die", "suicide", "suicidal",
    "kill", "abuse", "abused", "grief", "grieving", "nervous", "disappointed", "sick",
];

const NEGATORS: &[&str] = &[
    "not", "no", "never", "nothing", "hardly", "cannot", "can't", "cant", "don't", "dont",
    "doesn't", "didn't", "isn't", "wasn't", "aren't", "won't", "wouldn't", "couldn't",
];

/// Tokens after a negator that it still applies to.
const NEGATION_SCOPE: usize = 3;

/// Built-in binary polarity classifier.
///
/// Counts lexicon hits (negation flips polarity within a short scope) and maps
/// the evidence gap `d` to confidence `0.5 + 0.5 * d / (d + 1)`.
#[derive(Debug, Default, Clone)]
pub struct LexiconModel;

impl LexiconModel {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic polarity scoring without async overhead.
    pub fn score(&self, text: &str) -> SentimentResult {
        let normalized = text.to_lowercase().replace(['\u{2018}', '\u{2019}'], "'");
        let tokens: Vec<&str> = normalized
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|t| !t.is_empty())
            .collect();

        let mut positive = 0u32;
        let mut negative = 0u32;
        let mut negation_left = 0usize;

        for token in tokens {
            if NEGATORS.contains(&token) {
                negation_left = NEGATION_SCOPE;
                continue;
            }
            let polarity = if POSITIVE_WORDS.contains(&token) {
                Some(true)
            } else if NEGATIVE_WORDS.contains(&token) {
                Some(false)
            } else {
                None
            };
            if let Some(is_positive) = polarity {
                let flipped = negation_left > 0;
                match (is_positive, flipped) {
                    (true, false) | (false, true) => positive += 1,
                    (false, false) | (true, true) => negative += 1,
                }
                negation_left = 0;
            } else {
                negation_left = negation_left.saturating_sub(1);
            }
        }

        let gap = positive.abs_diff(negative) as f32;
        let score = 0.5 + 0.5 * gap / (gap + 1.0);
        let label = if positive >= negative {
            SentimentLabel::Positive
        } else {
            SentimentLabel::Negative
        };
        SentimentResult::new(label, score)
    }
}

#[async_trait]
impl SentimentModel for LexiconModel {
    fn name(&self) -> &str {
        "builtin-lexicon"
    }

    async fn classify(&self, text: &str) -> Result<SentimentResult, SentimentError> {
        Ok(self.score(text))
    }
}

// ── Hosted classifier ───────────────────────────────────────────────

/// Compute device requested for the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl Device {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" | "-1" => Some(Self::Cpu),
            "gpu" | "cuda" | "accelerator" | "0" => Some(Self::Gpu),
            _ => None,
        }
    }
}

/// Classifier served by a hosted inference endpoint.
pub struct HostedClassifier {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: SecretString,
    device: Device,
}

impl HostedClassifier {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        device: Device,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
            api_key,
            device,
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> SentimentError {
        SentimentError::ModelUnavailable {
            model: self.model.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SentimentModel for HostedClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, text: &str) -> Result<SentimentResult, SentimentError> {
        let body = serde_json::json!({
            "inputs": text,
            "options": {
                "wait_for_model": true,
                "use_gpu": self.device == Device::Gpu,
            }
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.unavailable(format!("HTTP {status}: {detail}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SentimentError::InvalidResponse {
                model: self.model.clone(),
                reason: e.to_string(),
            })?;

        parse_classifier_output(&payload).ok_or_else(|| SentimentError::InvalidResponse {
            model: self.model.clone(),
            reason: format!("unexpected payload: {payload}"),
        })
    }
}

/// Pick the top label from `[[{label, score}, ...]]` or `[{label, score}, ...]`.
fn parse_classifier_output(payload: &serde_json::Value) -> Option<SentimentResult> {
    let outer = payload.as_array()?;
    let candidates = match outer.first() {
        Some(serde_json::Value::Array(inner)) => inner,
        _ => outer,
    };

    candidates
        .iter()
        .filter_map(|c| {
            let label = match c.get("label")?.as_str()?.to_ascii_uppercase().as_str() {
                "POSITIVE" | "LABEL_1" | "POS" => SentimentLabel::Positive,
                "NEGATIVE" | "LABEL_0" | "NEG" => SentimentLabel::Negative,
                _ => return None,
            };
            let score = c.get("score")?.as_f64()? as f32;
            Some(SentimentResult::new(label, score))
        })
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

// ── Configuration ───────────────────────────────────────────────────

/// Which classifier backs the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SentimentBackend {
    #[default]
    Lexicon,
    HuggingFace,
}

/// Configuration for creating a sentiment model.
#[derive(Debug, Clone)]
pub struct SentimentConfig {
    pub backend: SentimentBackend,
    pub model: String,
    pub url: String,
    pub device: Device,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            backend: SentimentBackend::Lexicon,
            model: DEFAULT_SENTIMENT_MODEL.to_string(),
            url: format!("{DEFAULT_INFERENCE_BASE_URL}/{DEFAULT_SENTIMENT_MODEL}"),
            device: Device::Cpu,
            api_key: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Create a sentiment model from configuration.
///
/// A hosted backend without credentials falls back to the lexicon.
pub fn create_model(config: &SentimentConfig) -> Arc<dyn SentimentModel> {
    match (config.backend, &config.api_key) {
        (SentimentBackend::HuggingFace, Some(key)) => {
            info!(
                model = %config.model,
                device = ?config.device,
                "Using hosted sentiment classifier"
            );
            Arc::new(HostedClassifier::new(
                config.url.clone(),
                config.model.clone(),
                key.clone(),
                config.device,
            ))
        }
        (SentimentBackend::HuggingFace, None) => {
            warn!("HF_API_KEY not set; using built-in lexicon sentiment model");
            Arc::new(LexiconModel::new())
        }
        (SentimentBackend::Lexicon, _) => {
            info!("Using built-in lexicon sentiment model");
            Arc::new(LexiconModel::new())
        }
    }
}

// ── Analyzer ────────────────────────────────────────────────────────

/// Shared, read-only sentiment analyzer.
#[derive(Clone)]
pub struct SentimentAnalyzer {
    model: Arc<dyn SentimentModel>,
    timeout: Duration,
}

impl SentimentAnalyzer {
    pub fn new(model: Arc<dyn SentimentModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Classify a message.
    pub async fn analyze(&self, text: &str) -> Result<SentimentResult, SentimentError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(SentimentResult::neutral());
        }
        let window: String = trimmed.chars().take(MAX_CLASSIFIER_CHARS).collect();

        let result = tokio::time::timeout(self.timeout, self.model.classify(&window))
            .await
            .map_err(|_| SentimentError::Timeout {
                model: self.model.name().to_string(),
                timeout: self.timeout,
            })??;

        debug!(label = %result.label, score = result.score, "Sentiment analysis");
        Ok(result)
    }

    /// Classify a message, degrading to neutral on any model failure.
    pub async fn analyze_or_neutral(&self, text: &str) -> SentimentResult {
        match self.analyze(text).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Sentiment model failed, using neutral default");
                SentimentResult::neutral()
            }
        }
    }

    /// Run one warm-up classification at startup.
    pub async fn warm_up(&self) -> Result<(), SentimentError> {
        self.analyze("hello").await.map(|_| {
            info!(model = self.model_name(), "Sentiment model ready");
        })
    }
}

//! Shared types for the chat pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::{Conversation, Turn};
use crate::error::{PipelineError, ValidationError};
use crate::llm::LlmBackend;
use crate::safety::{self, RiskAssessment, RiskLevel};
use crate::sentiment::{SentimentLabel, SentimentResult};

/// Score at or above which negative sentiment switches to heightened empathy.
pub const STRONG_NEGATIVE_SCORE: f32 = 0.9;

// ── Inbound ─────────────────────────────────────────────────────────

/// One chat request from the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Prior turns, oldest first. Owned by the caller.
    #[serde(default)]
    pub conversation_history: Vec<Turn>,
    /// Per-request generation backend override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<LlmBackend>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_history: Vec::new(),
            provider: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_provider(mut self, provider: LlmBackend) -> Self {
        self.provider = Some(provider);
        self
    }
}

/// Trim and bound a raw message.
pub fn validate_message(raw: &str, max_chars: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let length = trimmed.chars().count();
    if length > max_chars {
        return Err(ValidationError::TooLong {
            length,
            max: max_chars,
        });
    }
    Ok(trimmed.to_string())
}

// ── Stages ──────────────────────────────────────────────────────────

/// Per-request orchestration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    SentimentScored,
    RiskScored,
    CrisisShortCircuit,
    ContextBuilt,
    Generated,
    Assembled,
}

impl PipelineStage {
    pub fn can_transition_to(&self, target: PipelineStage) -> bool {
        use PipelineStage::*;

        matches!(
            (self, target),
            (Received, SentimentScored)
                | (SentimentScored, RiskScored)
                | (RiskScored, CrisisShortCircuit)
                | (RiskScored, ContextBuilt)
                | (ContextBuilt, Generated)
                | (CrisisShortCircuit, Assembled)
                | (Generated, Assembled)
        )
    }

    /// Move to `target`, or fail if the transition is illegal.
    pub fn advance(self, target: PipelineStage) -> Result<PipelineStage, PipelineError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::SentimentScored => "sentiment_scored",
            Self::RiskScored => "risk_scored",
            Self::CrisisShortCircuit => "crisis_short_circuit",
            Self::ContextBuilt => "context_built",
            Self::Generated => "generated",
            Self::Assembled => "assembled",
        };
        write!(f, "{s}")
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// Which tier produced the bot response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// Fixed crisis template; generation skipped.
    Crisis,
    /// A generation provider.
    Provider,
    /// Deterministic template fallback.
    Template,
}

/// The terminal artifact returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub user_message: String,
    pub sentiment: SentimentResult,
    pub risk_level: RiskLevel,
    pub is_high_risk: bool,
    pub risk_indicators: Vec<String>,
    pub bot_response: String,
    pub reply_source: ReplySource,
    pub conversation_summary: String,
    pub resources: Vec<String>,
    /// Updated history for the caller to send back next time.
    pub conversation_history: Vec<Turn>,
}

impl ChatResponse {
    /// Merge the per-stage results into the response payload.
    pub fn assemble(
        user_message: String,
        sentiment: SentimentResult,
        risk: RiskAssessment,
        bot_response: String,
        reply_source: ReplySource,
        conversation: Conversation,
    ) -> Self {
        let conversation_summary = summary_label(&sentiment, risk.risk_level).to_string();
        let resources = safety::resource_suggestions(risk.risk_level)
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            user_message,
            sentiment,
            risk_level: risk.risk_level,
            is_high_risk: risk.is_high_risk,
            risk_indicators: risk.risk_indicators,
            bot_response,
            reply_source,
            conversation_summary,
            resources,
            conversation_history: conversation.into_turns(),
        }
    }
}

/// Short human-readable label for the conversation state.
pub fn summary_label(sentiment: &SentimentResult, risk: RiskLevel) -> &'static str {
    match (risk, sentiment.label) {
        (RiskLevel::High, _) => "Crisis indicators detected - safety resources provided",
        (RiskLevel::Medium, _) => "User showing signs of distress - supportive check-in mode",
        (RiskLevel::Low, SentimentLabel::Negative) if sentiment.score >= STRONG_NEGATIVE_SCORE => {
            "User expressing difficult emotions - heightened empathy mode"
        }
        (RiskLevel::Low, SentimentLabel::Negative) => {
            "User expressing some negative feelings - empathetic mode"
        }
        (RiskLevel::Low, SentimentLabel::Neutral) => {
            "Sentiment unavailable - neutral supportive mode"
        }
        (RiskLevel::Low, SentimentLabel::Positive) => {
            "Conversation flowing normally - supportive mode"
        }
    }
}

//! Reply generation with provider fallback.
//!
//! Tier order: the requested (or default) provider, then the built-in
//! templates. `generate` never fails; a provider error, an empty reply or a
//! missing provider all land on a template picked deterministically from the
//! message text.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::types::ReplySource;
use crate::context::Turn;
use crate::llm::{ChatMessage, CompletionRequest, LlmBackend, LlmConfig, LlmProvider};
use crate::safety::RiskLevel;
use crate::sentiment::{SentimentLabel, SentimentResult};

/// Base instructions sent with every generation request.
pub const SYSTEM_INSTRUCTIONS: &str = "You are a compassionate, empathetic mental wellness support chatbot.
Your role is to provide emotional support and encourage healthy coping strategies.

IMPORTANT GUIDELINES:
1. Always be warm, non-judgmental, and supportive
2. Validate the person's feelings and experiences
3. Ask thoughtful follow-up questions to show you understand
4. Suggest healthy coping strategies (journaling, exercise, breathing exercises, etc.)
5. Encourage professional help when appropriate
6. NEVER provide medical advice, diagnosis, or prescriptions
7. NEVER pretend to be a licensed therapist or psychiatrist
8. Keep responses concise and natural (2-4 sentences)
9. Use simple, clear language
10. If user is in crisis, immediately redirect to professional help

Remember: You are NOT a mental health professional. You provide general wellness support only.";

const CLOSING_INSTRUCTION: &str = "Please respond warmly and supportively to the user's message. Remember to stay within your role as a wellness chatbot.";

// ── Templates ───────────────────────────────────────────────────────

const NEGATIVE_TEMPLATES: &[&str] = &[
    "I hear that you're going through a difficult time. It's okay to feel this way, and I'm here to listen. What's been the most challenging part for you?",
    "Thank you for sharing that with me. Those feelings are valid, and many people experience what you're going through. Have you tried any coping strategies that have helped before?",
    "I can sense you're struggling right now. That takes courage to express. Remember that difficult feelings are temporary, even when they feel overwhelming.",
    "It sounds like you're dealing with a lot. While I can't provide medical advice, I encourage you to consider talking with a counselor or therapist who can offer professional support.",
    "I appreciate you opening up about this. Sometimes just acknowledging what we're feeling is an important first step. What would help you feel a little better right now?",
];

const POSITIVE_TEMPLATES: &[&str] = &[
    "That sounds wonderful! It's great to hear positive energy from you. What's been contributing to this good feeling?",
    "I'm glad to hear that! Celebrating these moments is important. How are you planning to maintain this positive momentum?",
    "That's fantastic! Keep nurturing what's bringing you joy. What's one thing you appreciate about yourself right now?",
    "Your positive outlook is inspiring! Keep channeling that energy into things that matter to you.",
    "That's excellent! It sounds like things are moving in a good direction for you. What's helping you feel this way?",
];

const NEUTRAL_TEMPLATES: &[&str] = &[
    "Thank you for sharing that with me. I'm here to listen. How have you been feeling lately?",
    "I appreciate you telling me about this. What's been on your mind the most today?",
    "I'm here for you. Would you like to tell me a bit more about what's going on?",
];

const CHECK_IN_TEMPLATES: &[&str] = &[
    "It sounds like things feel really heavy right now, and I'm glad you reached out. Talking with a counselor or a support line can help when it gets this hard. What feels most overwhelming at the moment?",
    "Thank you for trusting me with this. You don't have to carry it alone, and a therapist or crisis line can offer support beyond what I can. Is there someone you could reach out to today?",
    "I can hear how much you're going through. Your feelings matter, and professional support is available whenever you want it. What has helped you get through hard moments before?",
];

/// Template bank for a sentiment label and risk level.
fn template_bank(label: SentimentLabel, risk: RiskLevel) -> &'static [&'static str] {
    if risk >= RiskLevel::Medium {
        return CHECK_IN_TEMPLATES;
    }
    match label {
        SentimentLabel::Negative => NEGATIVE_TEMPLATES,
        SentimentLabel::Positive => POSITIVE_TEMPLATES,
        SentimentLabel::Neutral => NEUTRAL_TEMPLATES,
    }
}

/// Deterministic template for a message.
pub fn template_reply(message: &str, label: SentimentLabel, risk: RiskLevel) -> &'static str {
    let bank = template_bank(label, risk);
    bank[(stable_hash(message) % bank.len() as u64) as usize]
}

/// FNV-1a over the message bytes; stable across processes and releases.
fn stable_hash(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    text.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

// ── Requests ────────────────────────────────────────────────────────

/// Everything the generator needs for one reply.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_instructions: String,
    /// Newest turns, oldest first. Excludes the current message.
    pub conversation_window: Vec<Turn>,
    pub current_message: String,
    pub sentiment_hint: SentimentResult,
    pub risk_level: RiskLevel,
    pub provider_override: Option<LlmBackend>,
}

impl GenerationRequest {
    pub fn new(current_message: impl Into<String>, sentiment_hint: SentimentResult) -> Self {
        Self {
            system_instructions: SYSTEM_INSTRUCTIONS.to_string(),
            conversation_window: Vec::new(),
            current_message: current_message.into(),
            sentiment_hint,
            risk_level: RiskLevel::Low,
            provider_override: None,
        }
    }

    pub fn with_window(mut self, window: Vec<Turn>) -> Self {
        self.conversation_window = window;
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_provider_override(mut self, backend: Option<LlmBackend>) -> Self {
        self.provider_override = backend;
        self
    }

    /// System prompt: base instructions plus a tone line for the sentiment.
    pub fn system_prompt(&self) -> String {
        let tone = match self.sentiment_hint.label {
            SentimentLabel::Negative => {
                "The user is expressing negative emotions. Show extra empathy and validation."
            }
            SentimentLabel::Positive => {
                "The user seems to be in a better emotional state. Encourage positive momentum."
            }
            SentimentLabel::Neutral => {
                "The user's emotional state is unclear. Stay gentle and invite them to share more."
            }
        };
        let mut prompt = format!("{}\n\n{tone}", self.system_instructions);
        if self.risk_level == RiskLevel::Medium {
            prompt.push_str(
                "\nThe user may be in distress. Check in gently and mention that professional support is available.",
            );
        }
        prompt
    }

    /// User prompt: transcript of the window, the current message, the closing line.
    pub fn user_prompt(&self) -> String {
        let mut prompt = String::new();
        if !self.conversation_window.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for turn in &self.conversation_window {
                prompt.push_str(&format!("{}: {}\n", turn.role.speaker(), turn.content));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "Current user message:\nUser: {}\n\n{CLOSING_INSTRUCTION}",
            self.current_message
        ));
        prompt
    }
}

/// A reply and the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub source: ReplySource,
}

// ── Generator ───────────────────────────────────────────────────────

/// Produces supportive replies from the configured providers or templates.
#[derive(Clone)]
pub struct ResponseGenerator {
    providers: HashMap<LlmBackend, Arc<dyn LlmProvider>>,
    default_backend: LlmBackend,
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    max_reply_chars: usize,
}

impl ResponseGenerator {
    pub fn new(providers: HashMap<LlmBackend, Arc<dyn LlmProvider>>, config: &LlmConfig) -> Self {
        let default_backend = if config.backend != LlmBackend::Template
            && !providers.contains_key(&config.backend)
        {
            warn!(
                backend = %config.backend,
                "Default provider unavailable, replies will use templates"
            );
            LlmBackend::Template
        } else {
            config.backend
        };
        info!(backend = %default_backend, providers = providers.len(), "Response generator ready");
        Self {
            providers,
            default_backend,
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            max_reply_chars: config.max_reply_chars,
        }
    }

    /// Generator with no providers at all.
    pub fn template_only() -> Self {
        Self::new(
            HashMap::new(),
            &LlmConfig {
                backend: LlmBackend::Template,
                ..LlmConfig::default()
            },
        )
    }

    pub fn default_backend(&self) -> LlmBackend {
        self.default_backend
    }

    /// Model identifier of the default provider, or `"template"`.
    pub fn active_model(&self) -> String {
        self.providers
            .get(&self.default_backend)
            .map(|p| format!("{}:{}", p.name(), p.model_name()))
            .unwrap_or_else(|| LlmBackend::Template.to_string())
    }

    fn completion_request(&self, request: &GenerationRequest) -> CompletionRequest {
        CompletionRequest::new(vec![
            ChatMessage::system(request.system_prompt()),
            ChatMessage::user(request.user_prompt()),
        ])
        .with_max_tokens(self.max_new_tokens)
        .with_temperature(self.temperature)
        .with_top_p(self.top_p)
    }

    /// Generate a reply. Always returns non-empty text.
    pub async fn generate(&self, request: &GenerationRequest) -> Generated {
        let backend = request.provider_override.unwrap_or(self.default_backend);

        match self.providers.get(&backend) {
            Some(provider) => {
                match provider.complete(self.completion_request(request)).await {
                    Ok(response) => {
                        let text = cap_reply(&response.content, self.max_reply_chars);
                        if !text.is_empty() {
                            debug!(
                                provider = provider.name(),
                                chars = text.len(),
                                "Generated reply"
                            );
                            return Generated {
                                text,
                                source: ReplySource::Provider,
                            };
                        }
                        warn!(
                            provider = provider.name(),
                            "Provider returned empty reply, using template"
                        );
                    }
                    Err(e) => {
                        warn!(
                            provider = provider.name(),
                            error = %e,
                            "Generation failed, using template"
                        );
                    }
                }
            }
            None if backend != LlmBackend::Template => {
                debug!(%backend, "Requested provider not configured, using template");
            }
            None => {}
        }

        Generated {
            text: template_reply(
                &request.current_message,
                request.sentiment_hint.label,
                request.risk_level,
            )
            .to_string(),
            source: ReplySource::Template,
        }
    }
}

/// Trim and cap a generated reply, preferring to cut at a sentence end.
fn cap_reply(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    match cut.rfind(['.', '!', '?']) {
        Some(end) if end >= cut.len() / 2 => cut[..=end].to_string(),
        _ => cut.trim_end().to_string(),
    }
}

//! Chat pipeline: validate, score sentiment, score risk, then either
//! short-circuit to a crisis response or generate a supportive reply.
//!
//! **Core invariant: a high-risk message never reaches a generation provider.**
//! The crisis branch returns a fixed template and skips context and generation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::generator::{GenerationRequest, ResponseGenerator};
use super::types::{ChatRequest, ChatResponse, PipelineStage, ReplySource, validate_message};
use crate::context::{self, Conversation, Turn};
use crate::error::{PipelineError, ValidationError};
use crate::safety::{self, RiskAssessment, RiskScorer};
use crate::sentiment::{SentimentAnalyzer, SentimentResult};

/// Characters of the message included in log lines.
const LOG_PREVIEW_CHARS: usize = 100;

/// Per-request bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    pub max_message_chars: usize,
    /// History cap, applied after each append.
    pub max_history_turns: usize,
    /// Turns passed to the generator as context.
    pub context_window_turns: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_message_chars: 5000,
            max_history_turns: context::DEFAULT_MAX_TURNS,
            context_window_turns: 10,
        }
    }
}

/// Runs one chat request through every stage.
///
/// Holds only shared read-only handles, so one pipeline serves all
/// concurrent requests.
#[derive(Clone)]
pub struct ChatPipeline {
    sentiment: SentimentAnalyzer,
    risk: Arc<dyn RiskScorer>,
    generator: ResponseGenerator,
    limits: PipelineLimits,
}

impl ChatPipeline {
    pub fn new(
        sentiment: SentimentAnalyzer,
        risk: Arc<dyn RiskScorer>,
        generator: ResponseGenerator,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            sentiment,
            risk,
            generator,
            limits,
        }
    }

    pub fn limits(&self) -> PipelineLimits {
        self.limits
    }

    pub fn sentiment_model(&self) -> &str {
        self.sentiment.model_name()
    }

    pub fn generator(&self) -> &ResponseGenerator {
        &self.generator
    }

    /// Full chat: returns the reply, scores and updated history.
    pub async fn process(&self, request: ChatRequest) -> Result<ChatResponse, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("chat", %request_id);
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: ChatRequest) -> Result<ChatResponse, PipelineError> {
        let ChatRequest {
            message,
            conversation_history,
            provider,
        } = request;

        let stage = PipelineStage::Received;
        let message = validate_message(&message, self.limits.max_message_chars)?;
        info!(
            preview = %preview(&message),
            history = conversation_history.len(),
            "Processing chat message"
        );

        let sentiment = self.sentiment.analyze_or_neutral(&message).await;
        let stage = stage.advance(PipelineStage::SentimentScored)?;
        debug!(%stage, label = %sentiment.label, score = sentiment.score);

        let risk = self.score_risk(&message, Some(&sentiment));
        let mut stage = stage.advance(PipelineStage::RiskScored)?;
        debug!(%stage, risk_level = %risk.risk_level, indicators = risk.risk_indicators.len());

        let max_chars = self.limits.max_message_chars;
        let mut conversation = Conversation::from_history(
            conversation_history.into_iter().map(|t| t.truncated(max_chars)),
            self.limits.max_history_turns,
        );

        let (reply, source) = if risk.is_high_risk {
            stage = stage.advance(PipelineStage::CrisisShortCircuit)?;
            warn!(
                %stage,
                risk_level = %risk.risk_level,
                indicators = ?risk.risk_indicators,
                "High-risk message, returning crisis response"
            );
            (safety::crisis_response(&risk).to_string(), ReplySource::Crisis)
        } else {
            let window: Vec<Turn> = conversation
                .window(self.limits.context_window_turns)
                .into_iter()
                .cloned()
                .collect();
            stage = stage.advance(PipelineStage::ContextBuilt)?;
            debug!(%stage, window = window.len());

            let generation = GenerationRequest::new(message.clone(), sentiment)
                .with_window(window)
                .with_risk_level(risk.risk_level)
                .with_provider_override(provider);
            let generated = self.generator.generate(&generation).await;
            stage = stage.advance(PipelineStage::Generated)?;
            debug!(%stage, source = ?generated.source);
            (generated.text, generated.source)
        };

        conversation.append(Turn::user(message.clone()).with_sentiment(sentiment.label));
        conversation.append(Turn::bot(reply.clone()));
        stage.advance(PipelineStage::Assembled)?;

        info!(
            risk_level = %risk.risk_level,
            source = ?source,
            history = conversation.len(),
            "Chat message processed"
        );
        Ok(ChatResponse::assemble(
            message,
            sentiment,
            risk,
            reply,
            source,
            conversation,
        ))
    }

    /// Sentiment only. Validates the message first.
    pub async fn analyze_sentiment(
        &self,
        message: &str,
    ) -> Result<SentimentResult, ValidationError> {
        let message = validate_message(message, self.limits.max_message_chars)?;
        Ok(self.sentiment.analyze_or_neutral(&message).await)
    }

    /// Keyword risk scan only. No sentiment, so no escalation.
    pub fn assess_risk(&self, message: &str) -> Result<RiskAssessment, ValidationError> {
        let message = validate_message(message, self.limits.max_message_chars)?;
        Ok(self.score_risk(&message, None))
    }

    /// Score risk, failing closed if the scorer errors or panics.
    fn score_risk(&self, text: &str, sentiment: Option<&SentimentResult>) -> RiskAssessment {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.risk.score(text, sentiment)));
        match outcome {
            Ok(Ok(assessment)) => assessment,
            Ok(Err(e)) => {
                error!(error = %e, "Risk assessment failed, failing closed");
                RiskAssessment::fail_closed()
            }
            Err(_) => {
                error!("Risk scorer panicked, failing closed");
                RiskAssessment::fail_closed()
            }
        }
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
    if text.chars().count() > LOG_PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::context::Role;
    use crate::error::{LlmError, SafetyError, SentimentError};
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, LlmBackend, LlmConfig, LlmProvider,
    };
    use crate::safety::{CRISIS_RESPONSE, FAIL_CLOSED_INDICATOR, RiskAssessor, RiskLevel};
    use crate::sentiment::{LexiconModel, SentimentLabel, SentimentModel};

    /// Stub provider that records calls and returns a canned reply.
    struct StubLlm {
        calls: AtomicUsize,
        last: Mutex<Option<CompletionRequest>>,
    }

    impl StubLlm {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn name(&self) -> &str {
            "stub"
        }

        fn model_name(&self) -> &str {
            "stub-model"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request);
            Ok(CompletionResponse {
                content: "That's great to hear. What made today feel so good?".into(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    /// Sentiment model that counts calls and always fails.
    struct BrokenModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SentimentModel for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }

        async fn classify(&self, _text: &str) -> Result<SentimentResult, SentimentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SentimentError::ModelUnavailable {
                model: "broken".into(),
                reason: "not loaded".into(),
            })
        }
    }

    struct PanickingScorer;

    impl RiskScorer for PanickingScorer {
        fn score(
            &self,
            _text: &str,
            _sentiment: Option<&SentimentResult>,
        ) -> Result<RiskAssessment, SafetyError> {
            panic!("scorer blew up");
        }
    }

    struct ErroringScorer;

    impl RiskScorer for ErroringScorer {
        fn score(
            &self,
            _text: &str,
            _sentiment: Option<&SentimentResult>,
        ) -> Result<RiskAssessment, SafetyError> {
            Err(SafetyError::AssessmentFailed {
                reason: "lexicon missing".into(),
            })
        }
    }

    fn lexicon() -> SentimentAnalyzer {
        SentimentAnalyzer::new(Arc::new(LexiconModel::new()), Duration::from_secs(1))
    }

    fn generator(stub: &Arc<StubLlm>) -> ResponseGenerator {
        let mut providers: HashMap<LlmBackend, Arc<dyn LlmProvider>> = HashMap::new();
        providers.insert(LlmBackend::Ollama, stub.clone());
        ResponseGenerator::new(
            providers,
            &LlmConfig {
                backend: LlmBackend::Ollama,
                ..LlmConfig::default()
            },
        )
    }

    fn pipeline(stub: &Arc<StubLlm>) -> ChatPipeline {
        ChatPipeline::new(
            lexicon(),
            Arc::new(RiskAssessor::default()),
            generator(stub),
            PipelineLimits::default(),
        )
    }

    #[tokio::test]
    async fn crisis_message_short_circuits_generation() {
        let stub = StubLlm::new();
        let response = pipeline(&stub)
            .process(ChatRequest::new("I'm having thoughts of suicide"))
            .await
            .unwrap();

        assert_eq!(response.risk_level, RiskLevel::High);
        assert!(response.is_high_risk);
        assert_eq!(response.reply_source, ReplySource::Crisis);
        assert!(response.bot_response.contains("988"));
        assert!(
            response
                .risk_indicators
                .iter()
                .any(|i| i.starts_with("suicide:"))
        );
        assert_eq!(
            response.conversation_summary,
            "Crisis indicators detected - safety resources provided"
        );
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn escalated_distress_gets_general_crisis_response() {
        let stub = StubLlm::new();
        let response = pipeline(&stub)
            .process(ChatRequest::new("I'm depressed and I feel trapped"))
            .await
            .unwrap();

        assert_eq!(response.sentiment.label, SentimentLabel::Negative);
        assert!(response.is_high_risk);
        assert!(
            response
                .risk_indicators
                .iter()
                .all(|i| i.starts_with("distress:"))
        );
        assert_eq!(response.reply_source, ReplySource::Crisis);
        assert_eq!(response.bot_response, CRISIS_RESPONSE);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn happy_message_generates_supportive_reply() {
        let stub = StubLlm::new();
        let response = pipeline(&stub)
            .process(ChatRequest::new("I am so happy today!"))
            .await
            .unwrap();

        assert_eq!(response.sentiment.label, SentimentLabel::Positive);
        assert!(response.sentiment.score > 0.5);
        assert_eq!(response.risk_level, RiskLevel::Low);
        assert!(!response.is_high_risk);
        assert_eq!(response.reply_source, ReplySource::Provider);
        assert_ne!(response.bot_response, CRISIS_RESPONSE);
        assert!(!response.bot_response.contains("988"));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_scoring() {
        let stub = StubLlm::new();
        let model = Arc::new(BrokenModel {
            calls: AtomicUsize::new(0),
        });
        let pipeline = ChatPipeline::new(
            SentimentAnalyzer::new(model.clone(), Duration::from_secs(1)),
            Arc::new(RiskAssessor::default()),
            generator(&stub),
            PipelineLimits::default(),
        );

        let err = pipeline.process(ChatRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ValidationError::Empty)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn over_long_message_is_rejected() {
        let stub = StubLlm::new();
        let pipeline = ChatPipeline::new(
            lexicon(),
            Arc::new(RiskAssessor::default()),
            generator(&stub),
            PipelineLimits {
                max_message_chars: 10,
                ..PipelineLimits::default()
            },
        );
        let err = pipeline
            .process(ChatRequest::new("this is longer than ten"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::TooLong { max: 10, .. })
        ));
    }

    #[tokio::test]
    async fn panicking_scorer_fails_closed() {
        let stub = StubLlm::new();
        let pipeline = ChatPipeline::new(
            lexicon(),
            Arc::new(PanickingScorer),
            generator(&stub),
            PipelineLimits::default(),
        );
        let response = pipeline
            .process(ChatRequest::new("just a normal day"))
            .await
            .unwrap();

        assert!(response.is_high_risk);
        assert_eq!(response.risk_indicators, vec![FAIL_CLOSED_INDICATOR.to_string()]);
        assert_eq!(response.reply_source, ReplySource::Crisis);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn erroring_scorer_fails_closed() {
        let stub = StubLlm::new();
        let pipeline = ChatPipeline::new(
            lexicon(),
            Arc::new(ErroringScorer),
            generator(&stub),
            PipelineLimits::default(),
        );
        let risk = pipeline.assess_risk("hello").unwrap();
        assert_eq!(risk, RiskAssessment::fail_closed());
    }

    #[tokio::test]
    async fn sentiment_failure_degrades_to_neutral() {
        let stub = StubLlm::new();
        let pipeline = ChatPipeline::new(
            SentimentAnalyzer::new(
                Arc::new(BrokenModel {
                    calls: AtomicUsize::new(0),
                }),
                Duration::from_secs(1),
            ),
            Arc::new(RiskAssessor::default()),
            generator(&stub),
            PipelineLimits::default(),
        );
        let response = pipeline.process(ChatRequest::new("hello there")).await.unwrap();
        assert_eq!(response.sentiment, SentimentResult::neutral());
        assert_eq!(
            response.conversation_summary,
            "Sentiment unavailable - neutral supportive mode"
        );
        assert!(!response.bot_response.is_empty());
    }

    #[tokio::test]
    async fn history_is_capped_and_window_reaches_provider() {
        let stub = StubLlm::new();
        let history: Vec<Turn> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    Turn::user(format!("user turn {i}"))
                } else {
                    Turn::bot(format!("bot turn {i}"))
                }
            })
            .collect();

        let response = pipeline(&stub)
            .process(ChatRequest::new("Thanks, that helped").with_history(history))
            .await
            .unwrap();

        let turns = &response.conversation_history;
        assert_eq!(turns.len(), 20);
        assert_eq!(turns[0].content, "user turn 2");
        assert_eq!(turns[18].role, Role::User);
        assert_eq!(turns[18].content, "Thanks, that helped");
        assert_eq!(turns[18].sentiment, Some(response.sentiment.label));
        assert_eq!(turns[19].role, Role::Bot);
        assert_eq!(turns[19].content, response.bot_response);

        let sent = stub.last.lock().unwrap().clone().unwrap();
        let prompt = sent.user_prompt();
        assert!(prompt.contains("User: user turn 10"));
        assert!(prompt.contains("Assistant: bot turn 19"));
        assert!(!prompt.contains("user turn 8"));
    }

    #[tokio::test]
    async fn oversized_history_turns_are_truncated() {
        let stub = StubLlm::new();
        let pipeline = ChatPipeline::new(
            lexicon(),
            Arc::new(RiskAssessor::default()),
            generator(&stub),
            PipelineLimits {
                max_message_chars: 50,
                ..PipelineLimits::default()
            },
        );
        let history = vec![Turn::user("x".repeat(10_000)), Turn::bot("short reply")];

        let response = pipeline
            .process(ChatRequest::new("hello").with_history(history))
            .await
            .unwrap();

        let turns = &response.conversation_history;
        assert_eq!(turns[0].content, "x".repeat(50));
        assert_eq!(turns[1].content, "short reply");

        let sent = stub.last.lock().unwrap().clone().unwrap();
        let prompt = sent.user_prompt();
        assert!(prompt.contains(&format!("User: {}\n", "x".repeat(50))));
        assert!(!prompt.contains(&"x".repeat(51)));
    }

    #[tokio::test]
    async fn template_override_skips_provider() {
        let stub = StubLlm::new();
        let response = pipeline(&stub)
            .process(ChatRequest::new("I am so happy today!").with_provider(LlmBackend::Template))
            .await
            .unwrap();
        assert_eq!(response.reply_source, ReplySource::Template);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn risk_only_scan_does_not_escalate() {
        let stub = StubLlm::new();
        let pipeline = pipeline(&stub);
        let risk = pipeline
            .assess_risk("I feel hopeless and worthless, totally overwhelmed")
            .unwrap();
        assert_eq!(risk.risk_level, RiskLevel::Medium);
        assert!(!risk.is_high_risk);

        assert!(pipeline.assess_risk("").is_err());
    }

    #[tokio::test]
    async fn sentiment_only_validates() {
        let stub = StubLlm::new();
        let pipeline = pipeline(&stub);
        let result = pipeline.analyze_sentiment("I am so happy today!").await.unwrap();
        assert_eq!(result.label, SentimentLabel::Positive);
        assert_eq!(
            pipeline.analyze_sentiment(" ").await.unwrap_err(),
            ValidationError::Empty
        );
    }

    #[test]
    fn preview_is_bounded() {
        let long = "a".repeat(250);
        assert_eq!(preview(&long).chars().count(), LOG_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}

//! Chat message pipeline.
//!
//! Every chat message flows through:
//! 1. `validate_message()`: trim and bound, nothing is scored on failure
//! 2. `SentimentAnalyzer::analyze_or_neutral()`: polarity, degrades to neutral
//! 3. `RiskScorer::score()`: keyword risk, fails closed
//! 4. Crisis short-circuit, or `ResponseGenerator::generate()` over the context window
//!
//! **No generated reply for a high-risk message.** The crisis branch never
//! calls a provider.

pub mod generator;
pub mod processor;
pub mod types;

pub use generator::{GenerationRequest, Generated, ResponseGenerator};
pub use processor::{ChatPipeline, PipelineLimits};
pub use types::{ChatRequest, ChatResponse, PipelineStage, ReplySource, summary_label};

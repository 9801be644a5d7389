//! HTTP surface for the chat pipeline.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::error::{PipelineError, ValidationError};
use crate::pipeline::{ChatPipeline, ChatRequest, ChatResponse};
use crate::safety::RiskAssessment;
use crate::sentiment::SentimentResult;

/// Shown by clients next to every conversation.
pub const DISCLAIMER: &str = "This chatbot offers general emotional support and is not a substitute for professional mental health care. If you are in crisis, contact emergency services or call or text 988 (US).";

/// Labels the sentiment model can return.
const EMOTION_LABELS: &[&str] = &["POSITIVE", "NEGATIVE"];

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
}

/// Build the Axum router with chat, analysis and status routes.
pub fn chat_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .route("/chat", post(chat))
        .route("/analyze-sentiment", post(analyze_sentiment))
        .route("/assess-risk", post(assess_risk))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// Error returned to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    /// Bad input; the message is safe to show.
    BadRequest(ValidationError),
    /// The body could not be read as the expected JSON.
    Malformed(String),
    /// Anything else. Details stay in the logs.
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status_code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Malformed(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred. Please try again.".to_string(),
            ),
        };
        let body = ErrorBody {
            error: message,
            status_code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::BadRequest(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection, "Rejected request body");
        Self::Malformed(rejection.body_text())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(v) => Self::BadRequest(v),
            other => {
                error!(error = %other, "Chat pipeline failed");
                Self::Internal
            }
        }
    }
}

// ── Status ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "nlp_model": state.pipeline.sentiment_model(),
        "llm_provider": state.pipeline.generator().active_model(),
    }))
}

async fn config(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "max_conversation_history": state.pipeline.limits().max_history_turns,
        "sentiment_model": state.pipeline.sentiment_model(),
        "emotion_labels": EMOTION_LABELS,
        "risk_detection_enabled": true,
        "disclaimer": DISCLAIMER,
    }))
}

// ── Chat ────────────────────────────────────────────────────────────────

async fn chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = request?;
    let response = state.pipeline.process(request).await.inspect_err(|e| {
        if let PipelineError::Validation(v) = e {
            warn!(error = %v, "Rejected chat message");
        }
    })?;
    Ok(Json(response))
}

// ── Analysis ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct SentimentInsight {
    #[serde(flatten)]
    sentiment: SentimentResult,
    insight: &'static str,
}

async fn analyze_sentiment(
    State(state): State<AppState>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> Result<Json<SentimentInsight>, ApiError> {
    let Json(body) = body?;
    let sentiment = state.pipeline.analyze_sentiment(&body.message).await?;
    info!(label = %sentiment.label, "Sentiment-only request");
    Ok(Json(SentimentInsight {
        insight: sentiment.insight(),
        sentiment,
    }))
}

async fn assess_risk(
    State(state): State<AppState>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> Result<Json<RiskAssessment>, ApiError> {
    let Json(body) = body?;
    let assessment = state.pipeline.assess_risk(&body.message)?;
    info!(risk_level = %assessment.risk_level, "Risk-only request");
    Ok(Json(assessment))
}

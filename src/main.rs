use std::sync::Arc;

use anyhow::Context;

use wellness_chat::config::AppConfig;
use wellness_chat::llm::create_providers;
use wellness_chat::pipeline::{ChatPipeline, ResponseGenerator};
use wellness_chat::safety::RiskAssessor;
use wellness_chat::sentiment::{SentimentAnalyzer, create_model};
use wellness_chat::server::{AppState, chat_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    // ── Models ───────────────────────────────────────────────────────────
    let sentiment =
        SentimentAnalyzer::new(create_model(&config.sentiment), config.sentiment.timeout);
    if let Err(e) = sentiment.warm_up().await {
        tracing::warn!(error = %e, "Sentiment warm-up failed, requests will degrade to neutral");
    }

    let generator = ResponseGenerator::new(create_providers(&config.llm), &config.llm);
    let risk = Arc::new(RiskAssessor::default_rules(config.escalation));

    eprintln!("💬 Wellness Chat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Sentiment: {}", sentiment.model_name());
    eprintln!("   Replies: {}", generator.active_model());
    eprintln!("   API: http://{}/chat", config.server.bind_addr());

    let pipeline = ChatPipeline::new(sentiment, risk, generator, config.pipeline);
    let app = chat_routes(AppState {
        pipeline: Arc::new(pipeline),
    });

    // ── Server ───────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(config.server.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr()))?;
    tracing::info!(addr = %config.server.bind_addr(), "Chat server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

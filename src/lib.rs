//! Wellness Chat: sentiment-aware supportive chat core.

pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod safety;
pub mod sentiment;
pub mod server;

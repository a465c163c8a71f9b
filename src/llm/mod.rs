//! External LLM call (C8 collaborator, spec.md §6.2).
//!
//! Modeled on the teacher's `vision::vlm_client::VlmClient`: an
//! OpenAI-chat-compatible `reqwest::Client` wrapper with a fixed system
//! prompt chosen from context and usage captured from the response
//! envelope.

mod http_client;
mod mock;

pub use http_client::HttpLlmClient;
pub use mock::MockLlmClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Style;

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub style: Style,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Whether a failure is retryable per spec.md §6.2 ("transport errors,
/// timeouts, status 408/425/429/500/502/503/504, any response envelope
/// indicating provider overload").
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out")]
    Timeout,

    #[error("provider overloaded (status {0})")]
    Overloaded(u16),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transport(_) | LlmError::Overloaded(_) | LlmError::Timeout)
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Picks the fixed system prompt for a given icon style (spec.md §6.2 "a
/// fixed system prompt selected from the style").
pub fn system_prompt_for(style: Style) -> &'static str {
    match style {
        Style::Azure => {
            "You generate diagram-as-code source describing Azure cloud architectures. \
             Respond with a single fenced code block and nothing else."
        }
        Style::Aws => {
            "You generate diagram-as-code source describing AWS cloud architectures. \
             Respond with a single fenced code block and nothing else."
        }
        Style::Gcp => {
            "You generate diagram-as-code source describing Google Cloud architectures. \
             Respond with a single fenced code block and nothing else."
        }
        Style::K8s => {
            "You generate diagram-as-code source describing Kubernetes topologies. \
             Respond with a single fenced code block and nothing else."
        }
        Style::Generic => {
            "You generate generic diagram-as-code source describing system architectures. \
             Respond with a single fenced code block and nothing else."
        }
    }
}

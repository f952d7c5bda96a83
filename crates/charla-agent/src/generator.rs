use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use charla_core::types::Turn;

/// Default budget for a chat completion. Reasoning models get their own,
/// much longer timeout from config.
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request to an LLM provider, in the neutral message shape.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    pub temperature: Option<f32>,
    /// Adapters clamp this to the model's documented output window.
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Turn>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: 512,
            timeout: DEFAULT_CHAT_TIMEOUT,
        }
    }
}

/// Normalized token accounting across providers.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Why the model stopped, mapped from each provider's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Tool,
    Other,
}

impl FinishReason {
    /// Map a provider stop-reason string onto the closed set.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "stop_sequence" | "STOP" | "done" => FinishReason::Stop,
            "length" | "max_tokens" | "MAX_TOKENS" => FinishReason::Length,
            "content_filter" | "SAFETY" | "RECITATION" | "refusal" => FinishReason::ContentFilter,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::Tool,
            _ => FinishReason::Other,
        }
    }
}

/// A completed, non-streaming generation.
#[derive(Debug, Clone)]
pub struct GenerateReply {
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Uniform capability over remote and local LLM providers.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Adapter name for logging and registry lookup.
    fn name(&self) -> &str;

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateReply, GeneratorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("authentication rejected (HTTP {status})")]
    Auth { status: u16 },

    #[error("rate limited{}", retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    #[error("bad response: {0}")]
    BadResponse(String),
}

impl GeneratorError {
    /// Classify a reqwest failure: its timeout flavour is a first-class kind.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GeneratorError::Timeout
        } else {
            GeneratorError::Transport(e)
        }
    }
}

/// Map a non-success HTTP status (plus the Retry-After header and body text)
/// onto the error taxonomy. Shared by every adapter.
pub(crate) fn classify_status(
    status: u16,
    retry_after: Option<&str>,
    body: String,
) -> GeneratorError {
    match status {
        401 | 403 => GeneratorError::Auth { status },
        429 => GeneratorError::RateLimited {
            retry_after: retry_after
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        _ => GeneratorError::BadResponse(format!("HTTP {status}: {body}")),
    }
}

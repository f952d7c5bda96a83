use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use charla_core::types::Role;

use crate::catalog;
use crate::generator::{
    classify_status, FinishReason, GenerateReply, GenerateRequest, Generator, GeneratorError,
    TokenUsage,
};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicGenerator {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateReply, GeneratorError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .timeout(req.timeout)
            .json(&body)
            .send()
            .await
            .map_err(GeneratorError::from_reqwest)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(classify_status(status, retry_after.as_deref(), text));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| GeneratorError::BadResponse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

/// The Messages API takes the system prompt as a top-level field, so every
/// `system` turn is folded into it; only user/assistant turns remain in
/// `messages`.
pub(crate) fn build_request_body(req: &GenerateRequest) -> serde_json::Value {
    let system: Vec<&str> = req
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": catalog::clamp_max_tokens(&req.model, req.max_tokens),
        "messages": messages,
        "stream": false,
    });
    if !system.is_empty() {
        body["system"] = serde_json::json!(system.join("\n\n"));
    }
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    body
}

fn parse_response(resp: ApiResponse) -> GenerateReply {
    let content = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Unknown => None,
        })
        .collect::<Vec<_>>()
        .join("");

    GenerateReply {
        content,
        usage: TokenUsage {
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
        },
        finish_reason: FinishReason::from_provider(resp.stop_reason.as_deref().unwrap_or("")),
    }
}

// Anthropic API response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::catalog;
use crate::generator::{
    classify_status, FinishReason, GenerateReply, GenerateRequest, Generator, GeneratorError,
    TokenUsage,
};

/// Adapter for any OpenAI-wire-compatible endpoint. The named constructors
/// cover OpenAI itself plus the compatible providers this project ships with
/// (LM Studio on localhost, XAI).
pub struct OpenAiGenerator {
    client: reqwest::Client,
    generator_name: String,
    api_key: String,
    base_url: String,
    chat_path: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self::with_endpoint("openai", api_key, base_url, "/v1/chat/completions")
    }

    /// Named OpenAI-compatible endpoint. `base_url` without trailing slash,
    /// `chat_path` starting with "/".
    pub fn with_endpoint(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        chat_path: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            generator_name: name.into(),
            api_key,
            base_url,
            chat_path: chat_path.into(),
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.generator_name
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateReply, GeneratorError> {
        let body = build_request_body(req);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, provider = %self.generator_name, "sending chat completion");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
            warn!(status, provider = %self.generator_name, body = %text, "chat completion error");
            return Err(classify_status(status, retry_after.as_deref(), text));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| GeneratorError::BadResponse(e.to_string()))?;

        parse_response(api_resp)
    }
}

pub(crate) fn build_request_body(req: &GenerateRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": catalog::clamp_max_tokens(&req.model, req.max_tokens),
        "stream": false,
    });
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    body
}

fn parse_response(resp: ApiResponse) -> Result<GenerateReply, GeneratorError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GeneratorError::BadResponse("response has no choices".to_string()))?;

    let usage = resp.usage.unwrap_or_default();
    Ok(GenerateReply {
        content: choice.message.content.unwrap_or_default(),
        usage: TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
        finish_reason: FinishReason::from_provider(choice.finish_reason.as_deref().unwrap_or("")),
    })
}

// Wire response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

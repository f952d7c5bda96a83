use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use charla_core::types::Role;

use crate::catalog;
use crate::generator::{
    classify_status, FinishReason, GenerateReply, GenerateRequest, Generator, GeneratorError,
    TokenUsage,
};

pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiGenerator {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateReply, GeneratorError> {
        let body = build_request_body(req);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, req.model
        );

        debug!(model = %req.model, "sending request to Gemini");

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
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
            warn!(status, body = %text, "Gemini API error");
            return Err(classify_status(status, retry_after.as_deref(), text));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| GeneratorError::BadResponse(e.to_string()))?;

        parse_response(api_resp)
    }
}

/// Gemini speaks `user`/`model` roles and takes the system prompt as a
/// top-level `systemInstruction`.
pub(crate) fn build_request_body(req: &GenerateRequest) -> serde_json::Value {
    let system: Vec<&str> = req
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let contents: Vec<serde_json::Value> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                _ => "user",
            };
            serde_json::json!({
                "role": role,
                "parts": [{ "text": m.content }],
            })
        })
        .collect();

    let mut generation_config = serde_json::json!({
        "maxOutputTokens": catalog::clamp_max_tokens(&req.model, req.max_tokens),
    });
    if let Some(t) = req.temperature {
        generation_config["temperature"] = serde_json::json!(t);
    }

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": generation_config,
    });
    if !system.is_empty() {
        body["systemInstruction"] = serde_json::json!({
            "parts": [{ "text": system.join("\n\n") }],
        });
    }
    body
}

fn parse_response(resp: ApiResponse) -> Result<GenerateReply, GeneratorError> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GeneratorError::BadResponse("response has no candidates".to_string()))?;

    let content = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let usage = resp.usage_metadata.unwrap_or_default();
    Ok(GenerateReply {
        content,
        usage: TokenUsage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        },
        finish_reason: FinishReason::from_provider(candidate.finish_reason.as_deref().unwrap_or("")),
    })
}

// Gemini API response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::catalog;
use crate::generator::{
    classify_status, FinishReason, GenerateReply, GenerateRequest, Generator, GeneratorError,
    TokenUsage,
};

/// Local Ollama daemon, native `/api/chat` endpoint. No credentials.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaGenerator {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateReply, GeneratorError> {
        let body = build_request_body(req);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %req.model, "sending request to Ollama");

        let resp = self
            .client
            .post(&url)
            .timeout(req.timeout)
            .json(&body)
            .send()
            .await
            .map_err(GeneratorError::from_reqwest)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
            return Err(classify_status(status, None, text));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| GeneratorError::BadResponse(e.to_string()))?;

        Ok(GenerateReply {
            content: api_resp.message.map(|m| m.content).unwrap_or_default(),
            usage: TokenUsage {
                input_tokens: api_resp.prompt_eval_count.unwrap_or(0),
                output_tokens: api_resp.eval_count.unwrap_or(0),
            },
            finish_reason: FinishReason::from_provider(
                api_resp.done_reason.as_deref().unwrap_or("stop"),
            ),
        })
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

    let mut options = serde_json::json!({
        "num_predict": catalog::clamp_max_tokens(&req.model, req.max_tokens),
    });
    if let Some(t) = req.temperature {
        options["temperature"] = serde_json::json!(t);
    }

    serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": false,
        "options": options,
    })
}

#[derive(Deserialize)]
struct ApiResponse {
    message: Option<ApiMessage>,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}

//! OpenAI-compatible `/chat/completions` client (OpenAI, LM Studio, vLLM, ...).

use std::time::Duration;

use async_trait::async_trait;
use docqa_core::config::GenerationConfig;
use docqa_core::traits::{GenerationRequest, GenerationResponse, Generator};
use docqa_core::{GenerationError, Result};
use serde::{Deserialize, Serialize};

use crate::{http_client, non_blank, render_user_message, send};

const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: endpoint(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn messages(request: &GenerationRequest) -> Vec<Message> {
        vec![
            Message { role: "system".into(), content: request.system.clone() },
            Message { role: "user".into(), content: render_user_message(request) },
        ]
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<GenerationResponse, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::messages(request),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let text = send(req, self.timeout).await?;
        let answer = parse_response(&text)?;
        tracing::debug!(model = %self.model, chars = answer.len(), "chat completion complete");
        Ok(GenerationResponse { text: answer })
    }
}

/// Resolve the chat completions endpoint from the base URL.
pub fn endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Extract `choices[0].message.content`.
pub fn parse_response(body: &str) -> std::result::Result<String, GenerationError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Malformed(format!("invalid JSON: {e}")))?;
    non_blank(parsed.choices.into_iter().next().and_then(|c| c.message.content))
}

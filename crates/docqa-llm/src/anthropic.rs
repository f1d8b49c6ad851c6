use std::time::Duration;

use async_trait::async_trait;
use docqa_core::config::GenerationConfig;
use docqa_core::traits::{GenerationRequest, GenerationResponse, Generator};
use docqa_core::{GenerationError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{http_client, non_blank, render_user_message, send};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            endpoint: endpoint(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn prepare_request(&self, request: &GenerationRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": request.system,
            "messages": [{ "role": "user", "content": render_user_message(request) }],
        })
    }
}

#[async_trait]
impl Generator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<GenerationResponse, GenerationError> {
        let body = self.prepare_request(request);
        let req = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        let text = send(req, self.timeout).await?;
        let answer = parse_response(&text)?;
        tracing::debug!(model = %self.model, chars = answer.len(), "anthropic generation complete");
        Ok(GenerationResponse { text: answer })
    }
}

pub fn endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/messages") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/messages")
    } else {
        format!("{base}/v1/messages")
    }
}

/// Concatenate the text blocks of a Messages API response.
pub fn parse_response(body: &str) -> std::result::Result<String, GenerationError> {
    let parsed: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Malformed(format!("invalid JSON: {e}")))?;
    let text: Vec<String> = parsed
        .content
        .into_iter()
        .filter(|c| c.content_type == "text")
        .filter_map(|c| c.text)
        .collect();
    non_blank((!text.is_empty()).then(|| text.join("")))
}

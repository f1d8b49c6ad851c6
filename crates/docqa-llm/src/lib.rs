//! docqa-llm
//!
//! Generation backends behind [`docqa_core::traits::Generator`]: the Anthropic
//! Messages API and any OpenAI-compatible chat completions server. Both map
//! transport and HTTP failures onto [`GenerationError`] so the composer can
//! decide whether a retry is worth it.

use std::sync::Arc;
use std::time::Duration;

use docqa_core::config::{GenerationConfig, GenerationProvider};
use docqa_core::traits::{GenerationRequest, Generator};
use docqa_core::{Error, GenerationError, Result};

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicGenerator;
pub use openai::OpenAiGenerator;

/// The single user turn sent alongside the system instruction.
pub fn render_user_message(request: &GenerationRequest) -> String {
    format!(
        "Context Documents:\n{}\n\nQuestion: {}\n\nPlease provide a clear, accurate answer based on the context above.",
        request.context, request.question
    )
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::config(format!("Failed to create HTTP client: {e}")))
}

pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(timeout)
    } else {
        GenerationError::Transport(err.to_string())
    }
}

/// Send `req`, returning the body of a successful response.
pub(crate) async fn send(req: reqwest::RequestBuilder, timeout: Duration) -> std::result::Result<String, GenerationError> {
    let resp = req.send().await.map_err(|e| transport_error(e, timeout))?;
    let status = resp.status();
    let body = resp.text().await.map_err(|e| transport_error(e, timeout))?;
    if !status.is_success() {
        return Err(GenerationError::from_status(status.as_u16(), truncate(&body, 300)));
    }
    Ok(body)
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

pub(crate) fn non_blank(text: Option<String>) -> std::result::Result<String, GenerationError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(GenerationError::Malformed("response contained no text".into())),
    }
}

fn api_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

pub fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider {
        GenerationProvider::Anthropic => {
            let key = api_key(&config.api_key_env)
                .ok_or_else(|| Error::config(format!("{} not found in environment", config.api_key_env)))?;
            tracing::info!(model = %config.model, "using Anthropic generator");
            Ok(Arc::new(AnthropicGenerator::new(config, key)?))
        }
        GenerationProvider::OpenAi => {
            let key = api_key(&config.api_key_env);
            if key.is_none() {
                tracing::warn!(var = %config.api_key_env, "no generation API key set, sending unauthenticated requests");
            }
            tracing::info!(model = %config.model, "using OpenAI-compatible generator");
            Ok(Arc::new(OpenAiGenerator::new(config, key)?))
        }
    }
}

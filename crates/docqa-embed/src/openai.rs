//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use async_trait::async_trait;
use docqa_core::config::EmbeddingConfig;
use docqa_core::traits::Embedder;
use docqa_core::{Error, IndexError, Result};
use serde::Deserialize;

use crate::l2_normalize;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
    batch_size: usize,
    id: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint(&config.base_url),
            model: config.model.clone(),
            api_key,
            dim: config.dim,
            batch_size: config.batch_size.max(1),
            id: format!("openai:{}:d{}", config.model, config.dim),
        })
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| IndexError::Embedding(format!("request failed: {e}")))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| IndexError::Embedding(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(IndexError::Embedding(format!("{status}: {text}")).into());
        }
        parse_response(&text, texts.len(), self.dim)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_chunk(batch).await?);
        }
        tracing::debug!(inputs = texts.len(), model = %self.model, "embedded batch");
        Ok(out)
    }
}

/// Resolve the embeddings endpoint from a base URL.
pub fn endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/embeddings") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/embeddings")
    } else {
        format!("{base}/v1/embeddings")
    }
}

/// Parse and order vectors by `index`, checking count and dimension.
pub fn parse_response(body: &str, expected: usize, dim: usize) -> Result<Vec<Vec<f32>>> {
    let mut parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| IndexError::Embedding(format!("malformed response: {e}")))?;
    if parsed.data.len() != expected {
        return Err(IndexError::Embedding(format!("expected {expected} embeddings, got {}", parsed.data.len())).into());
    }
    parsed.data.sort_by_key(|item| item.index);
    parsed
        .data
        .into_iter()
        .map(|item| -> Result<Vec<f32>> {
            let mut v = item.embedding;
            if v.len() != dim {
                return Err(IndexError::DimensionMismatch { expected: dim, actual: v.len() }.into());
            }
            l2_normalize(&mut v);
            Ok(v)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_resolution() {
        assert_eq!(endpoint("https://api.openai.com/v1"), "https://api.openai.com/v1/embeddings");
        assert_eq!(endpoint("http://localhost:1234/"), "http://localhost:1234/v1/embeddings");
        assert_eq!(endpoint("http://host/v1/embeddings"), "http://host/v1/embeddings");
    }

    #[test]
    fn response_is_ordered_and_normalized() {
        let body = r#"{"data":[{"index":1,"embedding":[0.0,2.0]},{"index":0,"embedding":[3.0,4.0]}]}"#;
        let vecs = parse_response(body, 2, 2).unwrap();
        assert!((vecs[0][0] - 0.6).abs() < 1e-6);
        assert!((vecs[0][1] - 0.8).abs() < 1e-6);
        assert!((vecs[1][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let body = r#"{"data":[{"index":0,"embedding":[1.0,0.0,0.0]}]}"#;
        let err = parse_response(body, 1, 2).unwrap_err();
        assert!(matches!(err, Error::Index(IndexError::DimensionMismatch { expected: 2, actual: 3 })));
    }

    #[test]
    fn wrong_count_and_garbage_are_rejected() {
        let body = r#"{"data":[]}"#;
        assert!(matches!(parse_response(body, 1, 2), Err(Error::Index(IndexError::Embedding(_)))));
        assert!(matches!(parse_response("<html>", 1, 2), Err(Error::Index(IndexError::Embedding(_)))));
    }
}
